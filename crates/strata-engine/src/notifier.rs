//! Report delivery transports.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

/// Transport used to deliver the end-of-run report.
pub trait Notifier: Send + Sync {
    /// Deliver one report.
    ///
    /// # Errors
    ///
    /// Returns an error if the report was not accepted by the transport.
    fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Writes the report to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, subject: &str, body: &str) -> Result<()> {
        tracing::info!(subject, "Pipeline report");
        for line in body.lines() {
            tracing::info!("{line}");
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
}

/// POSTs the report as JSON `{subject, body}`.
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookNotifier {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, subject: &str, body: &str) -> Result<()> {
        tracing::info!(url = %self.url, subject, "Sending webhook notification");
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { subject, body })
            .send()
            .with_context(|| format!("Webhook request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Webhook {} rejected notification: HTTP {status}", self.url);
        }
        tracing::info!(status = status.as_u16(), "Webhook notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    /// Accept one request, answer with `status_line`, and hand back the
    /// request body.
    fn one_shot_server(status_line: &'static str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();
            let mut stream = stream;
            write!(stream, "{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .unwrap();
            tx.send(String::from_utf8(body).unwrap()).unwrap();
        });
        (url, rx)
    }

    #[test]
    fn log_notifier_always_succeeds() {
        assert!(LogNotifier.send("subject", "line one\nline two").is_ok());
    }

    #[test]
    fn webhook_posts_subject_and_body() {
        let (url, rx) = one_shot_server("HTTP/1.1 200 OK");
        let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).unwrap();
        notifier.send("ETL Pipeline Report", "summary").unwrap();

        let body: serde_json::Value = serde_json::from_str(&rx.recv().unwrap()).unwrap();
        assert_eq!(body["subject"], "ETL Pipeline Report");
        assert_eq!(body["body"], "summary");
    }

    #[test]
    fn webhook_non_success_status_is_an_error() {
        let (url, _rx) = one_shot_server("HTTP/1.1 503 Service Unavailable");
        let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).unwrap();
        let err = notifier.send("s", "b").unwrap_err().to_string();
        assert!(err.contains("503"), "got: {err}");
    }

    #[test]
    fn webhook_unreachable_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        drop(listener);
        let notifier = WebhookNotifier::new(url, Duration::from_secs(2)).unwrap();
        assert!(notifier.send("s", "b").is_err());
    }
}
