// SPDX-License-Identifier: MIT OR Apache-2.0
//! Output formatting utilities for the image pipeline CLI.

use imgpipe_core::User;
use imgpipe_daemon::api::{BatchStatusView, JobStatusView};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported output formats for CLI display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Compact JSON (single line).
    Json,
    /// Pretty-printed JSON.
    JsonPretty,
    /// Human-readable multi-line text.
    Text,
    /// Key-value aligned table.
    Table,
    /// Single-line summary.
    Compact,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Json => "json",
            Self::JsonPretty => "json-pretty",
            Self::Text => "text",
            Self::Table => "table",
            Self::Compact => "compact",
        };
        f.write_str(s)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "json-pretty" | "json_pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            "text" => Ok(Self::Text),
            "table" => Ok(Self::Table),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Formats daemon response types for CLI output.
#[derive(Debug, Clone)]
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    /// Create a new formatter with the given output format.
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Format a [`User`] according to the configured output format.
    #[must_use]
    pub fn format_user(&self, user: &User) -> String {
        match &self.format {
            OutputFormat::Json => serde_json::to_string(user).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(user).unwrap_or_default(),
            OutputFormat::Text => format!(
                "User:    {}\nEmail:   {}\nCredits: {}",
                user.user_id, user.email, user.credits
            ),
            OutputFormat::Table => format!(
                "{:<12} {}\n{:<12} {}\n{:<12} {}",
                "user_id", user.user_id, "email", user.email, "credits", user.credits
            ),
            OutputFormat::Compact => format!("[{}] {} credits={}", user.user_id, user.email, user.credits),
        }
    }

    /// Format a [`JobStatusView`] according to the configured output format.
    #[must_use]
    pub fn format_job(&self, job: &JobStatusView) -> String {
        match &self.format {
            OutputFormat::Json => serde_json::to_string(job).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(job).unwrap_or_default(),
            OutputFormat::Text => format_job_text(job),
            OutputFormat::Table => format_job_table(job),
            OutputFormat::Compact => format_job_compact(job),
        }
    }

    /// Format a [`BatchStatusView`] according to the configured output format.
    #[must_use]
    pub fn format_batch(&self, batch: &BatchStatusView) -> String {
        match &self.format {
            OutputFormat::Json => serde_json::to_string(batch).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(batch).unwrap_or_default(),
            OutputFormat::Text => {
                let mut lines = vec![format!(
                    "Batch:   {}\nOwner:   {}\nHold:    {} credits\nTerminal: {}",
                    batch.batch_id, batch.owner_user_id, batch.credit_hold, batch.terminal
                )];
                for job in &batch.jobs {
                    lines.push(format!("  - {}", format_job_compact(job)));
                }
                lines.join("\n")
            }
            OutputFormat::Table => {
                let mut lines = vec![
                    format!("{:<12} {}", "batch_id", batch.batch_id),
                    format!("{:<12} {}", "owner", batch.owner_user_id),
                    format!("{:<12} {}", "hold", batch.credit_hold),
                    format!("{:<12} {}", "terminal", batch.terminal),
                ];
                for job in &batch.jobs {
                    lines.push(format_job_table(job));
                }
                lines.join("\n")
            }
            OutputFormat::Compact => format!(
                "[{}] owner={} hold={} terminal={} jobs={}",
                batch.batch_id,
                batch.owner_user_id,
                batch.credit_hold,
                batch.terminal,
                batch.jobs.len()
            ),
        }
    }

    /// Format an error message according to the configured output format.
    #[must_use]
    pub fn format_error(&self, err: &str) -> String {
        match &self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => {
                serde_json::json!({"error": err}).to_string()
            }
            OutputFormat::Text => format!("Error: {err}"),
            OutputFormat::Table => format!("error  {err}"),
            OutputFormat::Compact => format!("[error] {err}"),
        }
    }
}

fn format_job_text(job: &JobStatusView) -> String {
    format!(
        "Job:     {}\nBatch:   {}\nStatus:  {:?}\nProgress: {:.0}%\nResult:  {}",
        job.job_id,
        job.batch_id,
        job.status,
        job.progress * 100.0,
        job.result_url.as_deref().unwrap_or("<none>"),
    )
}

fn format_job_table(job: &JobStatusView) -> String {
    format!(
        "{:<12} {}\n{:<12} {:?}\n{:<12} {:.0}%",
        "job_id", job.job_id, "status", job.status, "progress", job.progress * 100.0
    )
}

fn format_job_compact(job: &JobStatusView) -> String {
    format!("[{:?}] {} ({:.0}%)", job.status, job.job_id, job.progress * 100.0)
}
