//! CSV report rows.

use super::{ParseError, RowParser, SourceFile};
use crate::models::RawRecord;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Header names of the report columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Columns {
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default = "default_calls")]
    pub calls: String,
    #[serde(default = "default_handle")]
    pub handle: String,
    #[serde(default = "default_talk")]
    pub talk: String,
    #[serde(default = "default_acw")]
    pub after_call_work: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_first_name")]
    pub first_name: String,
    #[serde(default = "default_last_name")]
    pub last_name: String,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            agent: default_agent(),
            calls: default_calls(),
            handle: default_handle(),
            talk: default_talk(),
            after_call_work: default_acw(),
            group: default_group(),
            first_name: default_first_name(),
            last_name: default_last_name(),
        }
    }
}

fn default_agent() -> String {
    "AGENT".to_string()
}

fn default_calls() -> String {
    "CALLS count".to_string()
}

fn default_handle() -> String {
    "HANDLE TIME".to_string()
}

fn default_talk() -> String {
    "TALK TIME".to_string()
}

fn default_acw() -> String {
    "AFTER CALL WORK TIME".to_string()
}

fn default_group() -> String {
    "AGENT GROUP".to_string()
}

fn default_first_name() -> String {
    "AGENT FIRST NAME".to_string()
}

fn default_last_name() -> String {
    "AGENT LAST NAME".to_string()
}

/// Column positions resolved against one file's header row.
struct HeaderIndex {
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    fn new(headers: &StringRecord) -> Self {
        let positions = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (normalize(h), i))
            .collect();
        Self { positions }
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(&normalize(column)).copied()
    }
}

fn normalize(header: &str) -> String {
    header.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Reads report rows from a CSV export with a header row.
#[derive(Debug, Clone, Default)]
pub struct CsvRowParser {
    columns: Columns,
}

impl CsvRowParser {
    pub fn new(columns: Columns) -> Self {
        Self { columns }
    }

    fn read(&self, path: &Path) -> Result<Vec<RawRecord>, ParseError> {
        let malformed = |source| ParseError::Malformed {
            path: path.to_path_buf(),
            source,
        };

        let file = std::fs::File::open(path).map_err(|source| ParseError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .trim(Trim::All)
            .from_reader(file);

        let index = HeaderIndex::new(reader.headers().map_err(malformed)?);
        let agent = index
            .position(&self.columns.agent)
            .ok_or_else(|| ParseError::MissingColumn {
                path: path.to_path_buf(),
                column: self.columns.agent.clone(),
            })?;
        let calls = index.position(&self.columns.calls);
        let handle = index.position(&self.columns.handle);
        let talk = index.position(&self.columns.talk);
        let acw = index.position(&self.columns.after_call_work);
        let group = index.position(&self.columns.group);
        let first = index.position(&self.columns.first_name);
        let last = index.position(&self.columns.last_name);

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(malformed)?;
            let cell = |pos: Option<usize>| -> String {
                pos.and_then(|p| record.get(p)).unwrap_or("").to_string()
            };

            rows.push(RawRecord {
                agent_key: record.get(agent).unwrap_or("").to_string(),
                call_count: parse_count(&cell(calls)),
                handle: cell(handle),
                talk: cell(talk),
                after_call_work: cell(acw),
                group: cell(group),
                first_name: cell(first),
                last_name: cell(last),
            });
        }

        debug!("Read {} rows from {}", rows.len(), path.display());
        Ok(rows)
    }
}

impl RowParser for CsvRowParser {
    fn parse_rows(&self, file: &SourceFile) -> Result<Vec<RawRecord>, ParseError> {
        self.read(&file.path)
    }
}

/// Call counts are integers, but exports sometimes write `3.0`. Anything
/// else counts as zero calls.
fn parse_count(text: &str) -> u64 {
    let text = text.trim();
    if let Ok(n) = text.parse::<u64>() {
        return n;
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() && f > 0.0 => f.floor() as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn write_report(dir: &TempDir, content: &str) -> SourceFile {
        let path = dir.path().join("report.csv");
        std::fs::write(&path, content).unwrap();
        SourceFile::new(path, content.len() as u64, Utc::now())
    }

    #[test]
    fn test_parse_rows() {
        let temp = TempDir::new().unwrap();
        let file = write_report(
            &temp,
            "AGENT GROUP,AGENT,AGENT FIRST NAME,AGENT LAST NAME,CALLS count,HANDLE TIME,TALK TIME,AFTER CALL WORK TIME\n\
             Sales,ann@x.io,Ann,Lee,2,00:10:00,00:08:00,30\n\
             Sales,bo@x.io,Bo,,3.0,5:00,4:00,0\n",
        );

        let rows = CsvRowParser::default().parse_rows(&file).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].agent_key, "ann@x.io");
        assert_eq!(rows[0].call_count, 2);
        assert_eq!(rows[0].handle, "00:10:00");
        assert_eq!(rows[0].after_call_work, "30");
        assert_eq!(rows[0].group, "Sales");
        assert_eq!(rows[1].call_count, 3);
        assert_eq!(rows[1].last_name, "");
    }

    #[test]
    fn test_headers_match_case_insensitively() {
        let temp = TempDir::new().unwrap();
        let file = write_report(&temp, "\u{feff}agent , calls COUNT\na@x.io,4\n");

        let rows = CsvRowParser::default().parse_rows(&file).unwrap();

        assert_eq!(rows[0].agent_key, "a@x.io");
        assert_eq!(rows[0].call_count, 4);
        assert_eq!(rows[0].handle, "");
    }

    #[test]
    fn test_header_only_is_empty_not_error() {
        let temp = TempDir::new().unwrap();
        let file = write_report(&temp, "AGENT,CALLS count\n");

        let rows = CsvRowParser::default().parse_rows(&file).unwrap();

        assert!(rows.is_empty());
    }

    #[test]
    fn test_missing_agent_column() {
        let temp = TempDir::new().unwrap();
        let file = write_report(&temp, "NAME,CALLS count\nx,1\n");

        let result = CsvRowParser::default().parse_rows(&file);

        assert!(matches!(result, Err(ParseError::MissingColumn { .. })));
    }

    #[test]
    fn test_missing_file() {
        let file = SourceFile::new("/definitely/not/here.csv".into(), 0, Utc::now());
        let result = CsvRowParser::default().parse_rows(&file);
        assert!(matches!(result, Err(ParseError::Open { .. })));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("7"), 7);
        assert_eq!(parse_count(" 7 "), 7);
        assert_eq!(parse_count("2.9"), 2);
        assert_eq!(parse_count("-1"), 0);
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("many"), 0);
    }
}
