//! Run configuration: YAML types, parsing with `${VAR}` substitution, and
//! semantic validation.

pub mod parser;
pub mod types;
pub mod validator;
