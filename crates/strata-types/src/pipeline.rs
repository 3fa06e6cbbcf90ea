//! Pipeline configuration model.
//!
//! [`PipelineConfig`] is built once from a [`RawPipelineRow`] when the
//! configuration is loaded and is immutable for the rest of a run.

use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::state::PipelineId;

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// Target tier of a destination table.
///
/// The layer decides which lifecycle steps a pipeline runs:
///
/// | layer    | extract | transform |
/// |----------|---------|-----------|
/// | `public` | yes     | optional  |
/// | `bronze` | no      | required  |
/// | `silver` | no      | required  |
/// | `gold`   | no      | required  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineLayer {
    Public,
    Bronze,
    Silver,
    Gold,
}

impl PipelineLayer {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
        }
    }

    /// Whether data must be pulled from the source bucket for this layer.
    #[must_use]
    pub fn requires_extraction(self) -> bool {
        matches!(self, Self::Public)
    }

    /// Whether a pipeline targeting this layer is meaningless without a
    /// transformation step.
    #[must_use]
    pub fn requires_transform(self) -> bool {
        !self.requires_extraction()
    }
}

impl std::fmt::Display for PipelineLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineLayer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "bronze" => Ok(Self::Bronze),
            "silver" => Ok(Self::Silver),
            "gold" => Ok(Self::Gold),
            _ => Err(ConfigError::UnknownLayer(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Load type
// ---------------------------------------------------------------------------

/// Write policy for the destination relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadType {
    /// Replace every destination row.
    Full,
    /// Append without touching existing rows.
    Incremental,
}

impl LoadType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl std::fmt::Display for LoadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            _ => Err(ConfigError::UnknownLoadType(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline config
// ---------------------------------------------------------------------------

/// Untyped controller row as read from the configuration store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPipelineRow {
    pub id: String,
    pub data_source: String,
    pub source_table: String,
    pub destination_table: String,
    pub schema_name: String,
    pub load_type: String,
    pub active: bool,
}

/// Validated definition of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub id: PipelineId,
    /// Logical source name, also the object prefix under the bucket.
    pub data_source: String,
    /// Staging relation the extractor writes into.
    pub source_table: String,
    /// Curated relation produced by the transformation.
    pub destination_table: String,
    pub layer: PipelineLayer,
    pub load_type: LoadType,
    pub active: bool,
}

impl PipelineConfig {
    /// Copy of this config retargeted to the `public` landing layer.
    #[must_use]
    pub fn for_landing(&self, load_type_override: Option<LoadType>) -> Self {
        Self {
            layer: PipelineLayer::Public,
            load_type: load_type_override.unwrap_or(self.load_type),
            ..self.clone()
        }
    }

    /// dbt-style model selector for this pipeline's destination.
    #[must_use]
    pub fn model_selector(&self) -> String {
        format!("{}.{}", self.layer, self.destination_table)
    }
}

impl TryFrom<RawPipelineRow> for PipelineConfig {
    type Error = ConfigError;

    fn try_from(row: RawPipelineRow) -> Result<Self, Self::Error> {
        let id = row.id.trim().to_string();
        if id.is_empty() {
            return Err(ConfigError::EmptyField {
                pipeline: row.id,
                field: "id",
            });
        }
        let data_source = row.data_source.trim();
        if data_source.is_empty() {
            return Err(ConfigError::EmptyField {
                pipeline: id,
                field: "data_source",
            });
        }
        // Joined under the landing bucket, so it must stay a single directory name.
        if data_source.contains(['/', '\\']) || data_source == "." || data_source == ".." {
            return Err(ConfigError::InvalidDataSource {
                pipeline: id,
                value: data_source.to_string(),
            });
        }
        check_identifier(&id, "source_table", &row.source_table)?;
        check_identifier(&id, "destination_table", &row.destination_table)?;

        Ok(Self {
            layer: row.schema_name.parse()?,
            load_type: row.load_type.parse()?,
            id: PipelineId::new(id),
            data_source: data_source.to_string(),
            source_table: row.source_table,
            destination_table: row.destination_table,
            active: row.active,
        })
    }
}

/// Table names end up inside SQL statements, so only plain identifiers
/// are accepted.
fn check_identifier(pipeline: &str, field: &'static str, value: &str) -> Result<(), ConfigError> {
    let mut chars = value.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else if value.is_empty() {
        Err(ConfigError::EmptyField {
            pipeline: pipeline.to_string(),
            field,
        })
    } else {
        Err(ConfigError::InvalidIdentifier {
            pipeline: pipeline.to_string(),
            field,
            value: value.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Run date
// ---------------------------------------------------------------------------

/// Validated `YYYYMMDD` run date, used as the leading object prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunDate(NaiveDate);

impl RunDate {
    /// Parse an operator-supplied date.
    ///
    /// Leading dashes are ignored (`--20240115` is accepted); what remains
    /// must be exactly eight digits forming a real calendar date.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidDate`] otherwise.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let digits = input.trim().trim_start_matches('-');
        if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::InvalidDate(input.to_string()));
        }
        NaiveDate::parse_from_str(digits, "%Y%m%d")
            .map(Self)
            .map_err(|_| ConfigError::InvalidDate(input.to_string()))
    }

    /// Object prefix form (`20240115`).
    #[must_use]
    pub fn prefix(self) -> String {
        self.0.format("%Y%m%d").to_string()
    }
}

impl std::fmt::Display for RunDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}
