//! Delimited extraction records
//!
//! The extraction prompt asks for one record per line:
//!
//! ```text
//! entity|<name>|<description>|<class1,class2>
//! property|<entity>|<class>|<property>|<value>
//! relationship|<source>|<target>|<description>|<count>|<refer,...|NONE>
//! ```
//!
//! Records are separated by the record delimiter or newlines, may be wrapped
//! in parentheses or quotes, and the answer may end with the completion
//! token. A bad record is dropped and counted; it never aborts the batch.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ExtractionConfig;
use crate::error::{Error, Result};

use super::json::strip_fences;

/// Sentinel for an empty refer list
pub const REFER_NONE: &str = "NONE";

/// Delimiters of the record wire format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFormat {
    pub tuple_delimiter: String,
    pub record_delimiter: String,
    pub completion_delimiter: String,
}

impl Default for RecordFormat {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

impl RecordFormat {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            tuple_delimiter: config.tuple_delimiter.clone(),
            record_delimiter: config.record_delimiter.clone(),
            completion_delimiter: config.completion_delimiter.clone(),
        }
    }
}

/// One parsed record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionRecord {
    Entity {
        name: String,
        description: String,
        classes: Vec<String>,
    },
    Property {
        entity: String,
        class: String,
        property: String,
        value: String,
    },
    Relationship {
        source: String,
        target: String,
        description: String,
        count: u32,
        refer: Vec<String>,
    },
}

/// A record that was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedRecord {
    pub raw: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRecords {
    pub records: Vec<ExtractionRecord>,
    pub dropped: Vec<DroppedRecord>,
}

/// Split a service answer into records, dropping malformed ones
pub fn parse_records(response: &str, format: &RecordFormat) -> ParsedRecords {
    let mut parsed = ParsedRecords::default();

    for raw in split_records(strip_fences(response), format) {
        match parse_record(raw, format) {
            Ok(record) => parsed.records.push(record),
            Err(e) => {
                warn!(record = %raw, error = %e, "Dropping malformed extraction record");
                parsed.dropped.push(DroppedRecord {
                    raw: raw.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    parsed
}

fn split_records<'a>(body: &'a str, format: &'a RecordFormat) -> Vec<&'a str> {
    let mut records = Vec::new();
    let body = body.trim_end();
    let body = strip_completion(body, &format.completion_delimiter).unwrap_or(body);
    let chunks = body
        .split(format.record_delimiter.as_str())
        .flat_map(|chunk| chunk.lines());

    for chunk in chunks {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        if chunk.eq_ignore_ascii_case(&format.completion_delimiter) {
            break;
        }
        records.push(chunk);
    }
    records
}

/// `body` without a trailing completion token, if it ends with one
fn strip_completion<'a>(body: &'a str, completion: &str) -> Option<&'a str> {
    if completion.is_empty() || body.len() < completion.len() {
        return None;
    }
    let split = body.len() - completion.len();
    if !body.is_char_boundary(split) {
        return None;
    }
    let (rest, tail) = body.split_at(split);
    tail.eq_ignore_ascii_case(completion).then_some(rest)
}

/// Parse one record
pub fn parse_record(raw: &str, format: &RecordFormat) -> Result<ExtractionRecord> {
    let body = unwrap_record(raw);
    let fields: Vec<&str> = body
        .split(format.tuple_delimiter.as_str())
        .map(clean_field)
        .collect();

    let tag = fields.first().map(|t| t.to_lowercase()).unwrap_or_default();
    match tag.as_str() {
        "entity" => {
            expect_arity(&fields, 4, "entity")?;
            Ok(ExtractionRecord::Entity {
                name: non_empty(fields[1], "entity name")?,
                description: fields[2].to_string(),
                classes: split_list(fields[3]),
            })
        }
        "property" => {
            expect_arity(&fields, 5, "property")?;
            Ok(ExtractionRecord::Property {
                entity: non_empty(fields[1], "entity name")?,
                class: non_empty(fields[2], "class name")?,
                property: non_empty(fields[3], "property name")?,
                value: non_empty(fields[4], "property value")?,
            })
        }
        "relationship" => {
            expect_arity(&fields, 6, "relationship")?;
            Ok(ExtractionRecord::Relationship {
                source: non_empty(fields[1], "source")?,
                target: non_empty(fields[2], "target")?,
                description: non_empty(fields[3], "description")?,
                count: parse_count(fields[4])?,
                refer: parse_refer(fields[5]),
            })
        }
        "" => Err(Error::MalformedRecord("missing record kind".to_string())),
        other => Err(Error::MalformedRecord(format!("unknown record kind '{}'", other))),
    }
}

/// Comma-separated refer list; `NONE` or empty means no extra participants
pub fn parse_refer(field: &str) -> Vec<String> {
    let field = field.trim();
    if field.is_empty() || field.eq_ignore_ascii_case(REFER_NONE) {
        return Vec::new();
    }
    split_list(field)
        .into_iter()
        .filter(|r| !r.eq_ignore_ascii_case(REFER_NONE))
        .collect()
}

fn unwrap_record(raw: &str) -> &str {
    let mut body = raw.trim();
    loop {
        let stripped = body
            .strip_prefix('(')
            .and_then(|b| b.strip_suffix(')'))
            .or_else(|| body.strip_prefix('"').and_then(|b| b.strip_suffix('"')));
        match stripped {
            Some(inner) => body = inner.trim(),
            None => return body,
        }
    }
}

fn clean_field(field: &str) -> &str {
    field.trim().trim_matches(|c: char| c == '"' || c == '\'').trim()
}

fn split_list(field: &str) -> Vec<String> {
    field
        .split(',')
        .map(clean_field)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn expect_arity(fields: &[&str], expected: usize, kind: &str) -> Result<()> {
    if fields.len() == expected {
        Ok(())
    } else {
        Err(Error::MalformedRecord(format!(
            "{} record needs {} fields, got {}",
            kind,
            expected,
            fields.len()
        )))
    }
}

fn non_empty(field: &str, what: &str) -> Result<String> {
    if field.is_empty() {
        Err(Error::MalformedRecord(format!("empty {}", what)))
    } else {
        Ok(field.to_string())
    }
}

fn parse_count(field: &str) -> Result<u32> {
    match field.parse::<u32>() {
        Ok(0) => Err(Error::MalformedRecord("count must be at least 1".to_string())),
        Ok(count) => Ok(count),
        Err(_) => Err(Error::MalformedRecord(format!("count '{}' is not a number", field))),
    }
}
