//! Domain types shared between the warehouse adapters and the advisor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::warehouse::quote_ident;

/// Compression algorithms an append-optimized column can be stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionType {
    RleType,
    Zlib,
    Quicklz,
}

impl CompressionType {
    pub const ALL: [CompressionType; 3] = [
        CompressionType::RleType,
        CompressionType::Zlib,
        CompressionType::Quicklz,
    ];

    /// Name as understood by the storage engine in `compresstype=` clauses.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::RleType => "RLE_TYPE",
            CompressionType::Zlib => "ZLIB",
            CompressionType::Quicklz => "QUICKLZ",
        }
    }

    /// Inclusive range of levels the engine accepts for this type.
    pub fn levels(&self) -> std::ops::RangeInclusive<u8> {
        match self {
            CompressionType::RleType => 1..=4,
            CompressionType::Zlib => 1..=9,
            CompressionType::Quicklz => 1..=1,
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionType {
    type Err = ParseCandidateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompressionType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseCandidateError::UnknownType(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCandidateError {
    #[error("Unknown compression type '{0}'")]
    UnknownType(String),
    #[error("Invalid compression level in '{0}'")]
    InvalidLevel(String),
    #[error("Level {level} is not supported by {compression_type}")]
    UnsupportedLevel {
        compression_type: CompressionType,
        level: u8,
    },
    #[error("Expected TYPE_LEVEL, got '{0}'")]
    Malformed(String),
}

/// One (compression type, level) pair under benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateConfig {
    pub compression_type: CompressionType,
    pub level: u8,
}

impl CandidateConfig {
    pub fn new(compression_type: CompressionType, level: u8) -> Result<Self, ParseCandidateError> {
        if !compression_type.levels().contains(&level) {
            return Err(ParseCandidateError::UnsupportedLevel {
                compression_type,
                level,
            });
        }
        Ok(Self {
            compression_type,
            level,
        })
    }

    /// `TYPE_LEVEL` key, e.g. `RLE_TYPE_3`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.compression_type, self.level)
    }
}

impl fmt::Display for CandidateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.compression_type, self.level)
    }
}

impl FromStr for CandidateConfig {
    type Err = ParseCandidateError;

    /// Parses `TYPE_LEVEL` keys. The type itself may contain underscores
    /// (`RLE_TYPE_2`), so the level is split off the right.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_part, level_part) = s
            .trim()
            .rsplit_once('_')
            .ok_or_else(|| ParseCandidateError::Malformed(s.to_string()))?;
        let compression_type: CompressionType = type_part.parse()?;
        let level: u8 = level_part
            .parse()
            .map_err(|_| ParseCandidateError::InvalidLevel(s.to_string()))?;
        CandidateConfig::new(compression_type, level)
    }
}

/// Encoding currently attached to a column, as reported by the catalog.
///
/// The type is kept as the raw lower-cased string because the catalog may
/// report types outside the benchmarked set (`none`, `zstd`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnEncoding {
    pub compression_type: String,
    pub level: Option<u8>,
}

impl ColumnEncoding {
    /// Whether this encoding is the given candidate configuration.
    pub fn matches(&self, config: &CandidateConfig) -> bool {
        self.compression_type
            .eq_ignore_ascii_case(config.compression_type.as_str())
            && self.level == Some(config.level)
    }
}

impl fmt::Display for ColumnEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            Some(level) => write!(f, "{}/{}", self.compression_type.to_uppercase(), level),
            None => write!(f, "{}", self.compression_type.to_uppercase()),
        }
    }
}

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Quoted `schema.table` suitable for splicing into SQL.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Physical size of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSize {
    pub bytes: u64,
    pub human: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candidate_keys() {
        let config: CandidateConfig = "RLE_TYPE_3".parse().unwrap();
        assert_eq!(config.compression_type, CompressionType::RleType);
        assert_eq!(config.level, 3);

        let config: CandidateConfig = "zlib_9".parse().unwrap();
        assert_eq!(config.compression_type, CompressionType::Zlib);
        assert_eq!(config.key(), "ZLIB_9");
    }

    #[test]
    fn test_parse_candidate_rejects_bad_input() {
        assert_eq!(
            "LZ4_1".parse::<CandidateConfig>(),
            Err(ParseCandidateError::UnknownType("LZ4".to_string()))
        );
        assert!(matches!(
            "QUICKLZ_2".parse::<CandidateConfig>(),
            Err(ParseCandidateError::UnsupportedLevel { level: 2, .. })
        ));
        assert!(matches!(
            "ZLIB_x".parse::<CandidateConfig>(),
            Err(ParseCandidateError::InvalidLevel(_))
        ));
        assert!(matches!(
            "ZLIB".parse::<CandidateConfig>(),
            Err(ParseCandidateError::Malformed(_))
        ));
    }

    #[test]
    fn test_encoding_matches_case_insensitively() {
        let encoding = ColumnEncoding {
            compression_type: "zlib".to_string(),
            level: Some(5),
        };
        let zlib_5 = CandidateConfig::new(CompressionType::Zlib, 5).unwrap();
        let zlib_1 = CandidateConfig::new(CompressionType::Zlib, 1).unwrap();
        assert!(encoding.matches(&zlib_5));
        assert!(!encoding.matches(&zlib_1));

        let no_level = ColumnEncoding {
            compression_type: "zlib".to_string(),
            level: None,
        };
        assert!(!no_level.matches(&zlib_5));
    }

    #[test]
    fn test_table_ref_quotes_when_needed() {
        assert_eq!(TableRef::new("public", "events").qualified(), "public.events");
        assert_eq!(
            TableRef::new("Sales", "order items").qualified(),
            "\"Sales\".\"order items\""
        );
    }
}
