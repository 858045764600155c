use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

const TIMESTAMP_FORMAT: &str = "%b %d %H:%M:%S %Y";

pub const UNKNOWN_KIND: &str = "Unknown";

static TIMEZONE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s[A-Z]{3}\s").expect("static regex"));

static PORTAL_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.jgi.+\.(?:gov|org)/([^/]+)/").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Organism(String);

impl Organism {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Organism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Organism {
    type Err = QueryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let name = PORTAL_ADDRESS
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or(trimmed);
        let is_valid = !name.is_empty()
            && name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
        if !is_valid {
            return Err(QueryError::InvalidOrganism(value.to_string()));
        }
        Ok(Self(name.to_string()))
    }
}

pub type FileAttributes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub filename: String,
    pub url: String,
    pub display_size: Option<String>,
    pub size_in_bytes: Option<u64>,
    pub timestamp: Option<NaiveDateTime>,
    pub checksum: Option<String>,
    pub kind_hint: Option<String>,
    pub label: Option<String>,
}

impl FileRecord {
    pub fn from_attributes(attributes: &FileAttributes) -> Option<Self> {
        let filename = non_empty(attributes.get("filename"))?;
        let url = non_empty(attributes.get("url"))?;
        Some(Self {
            filename,
            url,
            display_size: non_empty(attributes.get("size")),
            size_in_bytes: attributes
                .get("sizeInBytes")
                .and_then(|value| value.trim().parse().ok()),
            timestamp: attributes
                .get("timestamp")
                .and_then(|value| parse_catalog_timestamp(value)),
            checksum: non_empty(attributes.get("md5")),
            kind_hint: non_empty(attributes.get("fileType")),
            label: non_empty(attributes.get("label")),
        })
    }

    pub fn has_known_kind(&self) -> bool {
        self.kind_hint
            .as_deref()
            .map(|kind| kind != UNKNOWN_KIND)
            .unwrap_or(false)
    }

    pub fn month_year(&self) -> Option<String> {
        self.timestamp
            .map(|ts| format!("{:02}/{}", ts.month(), ts.year()))
    }

    pub fn integrity_signal(&self) -> Option<IntegritySignal> {
        if let Some(checksum) = &self.checksum {
            return Some(IntegritySignal::Checksum(checksum.clone()));
        }
        self.size_in_bytes.map(IntegritySignal::Size)
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Weekday and timezone tokens are dropped; the portal's weekday does not
/// always agree with the date.
pub fn parse_catalog_timestamp(value: &str) -> Option<NaiveDateTime> {
    let stripped = TIMEZONE_TOKEN.replace(value.trim(), " ");
    let (_weekday, rest) = stripped.split_once(char::is_whitespace)?;
    NaiveDateTime::parse_from_str(rest.trim_start(), TIMESTAMP_FORMAT).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Coordinate {
    pub category: u32,
    pub index: u32,
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegritySignal {
    Checksum(String),
    Size(u64),
}

impl IntegritySignal {
    pub fn checksum(&self) -> Option<&str> {
        match self {
            IntegritySignal::Checksum(value) => Some(value),
            IntegritySignal::Size(_) => None,
        }
    }

    pub fn expected_size(&self) -> Option<u64> {
        match self {
            IntegritySignal::Checksum(_) => None,
            IntegritySignal::Size(value) => Some(*value),
        }
    }
}
