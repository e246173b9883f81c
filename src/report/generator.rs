//! HTML mail generation.
//!
//! Agent mails carry the per-agent totals; operator mails announce the
//! start and end of the daily job.

use crate::duration::format_duration;
use crate::models::{AggregatedAgent, BatchSummary};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// A rendered mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub html: String,
}

/// Machine-readable record of one ingested batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Identity of the ingested file.
    pub file_id: String,
    pub business_day: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub summary: BatchSummary,
    pub agents: Vec<AggregatedAgent>,
}

/// Escape text for inclusion in HTML.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn stat_line(label: &str, value: &str) -> String {
    format!("<p><b>{}:</b> {}</p>\n", label, escape_html(value))
}

/// Per-agent activity mail.
pub fn agent_email(agent: &AggregatedAgent, day: NaiveDate, signature: &str) -> Email {
    let date = day.format("%Y-%m-%d").to_string();
    let mut html = String::new();

    html.push_str(&format!(
        "<p style=\"margin-bottom:12px;\">Hello <b>{}</b>,</p>\n",
        escape_html(&agent.display_name())
    ));
    html.push_str(&format!(
        "<p style=\"margin-bottom:12px;\">Here is your activity stats for <b>{}</b>:</p>\n",
        date
    ));

    html.push_str("<div style=\"border-left:4px solid #6A3826;padding:12px 15px;margin:18px 0;\">\n");
    html.push_str(&stat_line("Email (AGENT)", &agent.agent_key));
    html.push_str(&stat_line("Calls Count", &agent.total_calls.to_string()));
    html.push_str("<hr style=\"border:none;border-top:1px solid #ccc;margin:10px 0;\">\n");
    html.push_str(&stat_line(
        "Handle Time",
        &format_duration(agent.total_handle_secs),
    ));
    html.push_str(&stat_line("Avg Handle Time", &agent.avg_handle));
    html.push_str(&stat_line("Talk Time", &format_duration(agent.total_talk_secs)));
    html.push_str(&stat_line("Avg Talk Time", &agent.avg_talk));
    html.push_str(&stat_line(
        "After Call Work Time",
        &format_duration(agent.total_acw_secs),
    ));
    html.push_str(&stat_line("Avg After Call Work Time", &agent.avg_acw));
    html.push_str("</div>\n");

    html.push_str(&generate_footer(signature));

    Email {
        subject: format!("Hourly Activity Report - {}", date),
        html,
    }
}

/// Operator mail sent once when the day's first run is admitted.
pub fn started_email(day: NaiveDate, at: &str) -> Email {
    let mut html = String::new();
    html.push_str("<p>Hello Team,</p>\n");
    html.push_str("<p>The daily agent report job has <b>STARTED</b>.</p>\n");
    html.push_str(&stat_line("Start Time", at));
    html.push_str("<br>\n<p>- System</p>\n");

    Email {
        subject: format!("Daily Agent Job Started - {}", day.format("%Y-%m-%d")),
        html,
    }
}

/// Operator mail sent once after the window closes.
pub fn ended_email(day: NaiveDate, sheets: u32, at: &str) -> Email {
    let date = day.format("%Y-%m-%d").to_string();
    let mut html = String::new();
    html.push_str("<p>Hello Team,</p>\n");
    html.push_str("<p>The daily agent report job has <b>ENDED</b>.</p>\n");
    html.push_str(&stat_line("Date", &date));
    html.push_str(&stat_line("Total Sheets Processed Today", &sheets.to_string()));
    html.push_str(&stat_line("End Time", at));
    html.push_str("<br>\n<p>- System</p>\n");

    Email {
        subject: format!("Daily Agent Job Ended - {}", date),
        html,
    }
}

fn generate_footer(signature: &str) -> String {
    format!(
        "<p style=\"margin-top:25px;font-size:13px;color:#777;\">Thank you,<br>{}</p>\n",
        escape_html(signature)
    )
}

/// Generate a JSON batch report.
pub fn generate_json_report(report: &BatchReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write a JSON batch report to a file.
pub fn write_json_report(report: &BatchReport, path: &Path) -> Result<()> {
    let content = generate_json_report(report)?;

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
