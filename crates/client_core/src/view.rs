use std::{
    cmp::{Ordering, Reverse},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::record::{FieldValue, Record};
use thiserror::Error;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }

    /// Same field flips the direction; any other field starts ascending.
    pub fn toggle(current: Option<&SortKey>, field: &str) -> SortKey {
        match current {
            Some(active) if active.field == field => SortKey {
                field: active.field.clone(),
                direction: active.direction.flipped(),
            },
            _ => SortKey::ascending(field),
        }
    }

    pub fn indicator(current: Option<&SortKey>, field: &str) -> Option<SortDirection> {
        current
            .filter(|active| active.field == field)
            .map(|active| active.direction)
    }
}

// Variant order is the ascending order across kinds; nulls sort after
// everything else.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortCell {
    Bool(bool),
    Number(TotalF64),
    Date(DateTime<Utc>),
    Text { folded: String, raw: String },
    Null,
}

#[derive(Debug)]
struct TotalF64(f64);

impl PartialEq for TotalF64 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TotalF64 {}

impl PartialOrd for TotalF64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF64 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl SortCell {
    fn of(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => Self::Null,
            FieldValue::Bool(b) => Self::Bool(*b),
            FieldValue::Number(n) => Self::Number(TotalF64(*n)),
            FieldValue::Date(d) => Self::Date(*d),
            FieldValue::Text(s) => Self::Text {
                folded: fold_text(s),
                raw: s.clone(),
            },
        }
    }
}

/// Collation key for text: canonical decomposition with combining marks
/// removed, then lowercased. "Ärger" sorts with "arger", between "Apfel" and
/// "Birne".
pub fn fold_text(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn compare_values(a: &FieldValue, b: &FieldValue) -> Ordering {
    SortCell::of(a).cmp(&SortCell::of(b))
}

/// Stable sort by one field; equal keys keep their source order in both
/// directions.
pub fn sort_by(records: &[Record], key: &SortKey) -> Vec<Record> {
    let mut sorted = records.to_vec();
    sort_in_place(&mut sorted, key);
    sorted
}

pub fn sort_in_place(records: &mut [Record], key: &SortKey) {
    let field = key.field.as_str();
    match key.direction {
        SortDirection::Ascending => {
            records.sort_by_cached_key(|record| SortCell::of(record.get(field)))
        }
        SortDirection::Descending => {
            records.sort_by_cached_key(|record| Reverse(SortCell::of(record.get(field))))
        }
    }
}

pub fn apply_local_filter<P>(records: &[Record], predicate: P) -> Vec<Record>
where
    P: Fn(&Record) -> bool,
{
    records
        .iter()
        .filter(|record| predicate(record))
        .cloned()
        .collect()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("filter {0:?} must look like field=value or field~text")]
    MissingOperator(String),
    #[error("filter {0:?} names no field")]
    MissingField(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LocalFilter {
    /// Field text equals `value` exactly. `Null` reads as "".
    Equals { field: String, value: String },
    /// Field text contains `needle`, ignoring case and accents.
    Contains { field: String, needle: String },
}

impl LocalFilter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Equals { field, value } => record.get(field).to_string() == *value,
            Self::Contains { field, needle } => {
                let cell = record.get(field);
                if cell.is_null() {
                    return needle.is_empty();
                }
                fold_text(&cell.to_string()).contains(&fold_text(needle))
            }
        }
    }

    pub fn apply(&self, records: &[Record]) -> Vec<Record> {
        apply_local_filter(records, |record| self.matches(record))
    }
}

impl FromStr for LocalFilter {
    type Err = FilterParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let split_at = raw
            .find(|c: char| c == '=' || c == '~')
            .ok_or_else(|| FilterParseError::MissingOperator(raw.to_string()))?;
        let field = raw[..split_at].trim();
        if field.is_empty() {
            return Err(FilterParseError::MissingField(raw.to_string()));
        }
        let operand = raw[split_at + 1..].to_string();
        let field = field.to_string();
        Ok(if raw.as_bytes()[split_at] == b'~' {
            Self::Contains {
                field,
                needle: operand,
            }
        } else {
            Self::Equals {
                field,
                value: operand,
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
