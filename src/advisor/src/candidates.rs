//! Candidate configurations and their cost weights.
//!
//! Both tables are plain values built once at startup and shared read-only
//! between column tasks.

use common::model::ParseCandidateError;
use common::{CandidateConfig, CompressionType};
use std::collections::{BTreeMap, HashMap};

/// Weight of any candidate missing from the weight table.
pub const DEFAULT_WEIGHT: u32 = 5;

/// Ordered set of configurations every column is benchmarked under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet {
    configs: Vec<CandidateConfig>,
}

impl CandidateSet {
    /// RLE_TYPE 1-4, ZLIB 1/5/9, QUICKLZ 1.
    pub fn standard() -> Self {
        let pairs: [(CompressionType, &[u8]); 3] = [
            (CompressionType::RleType, &[1, 2, 3, 4]),
            (CompressionType::Zlib, &[1, 5, 9]),
            (CompressionType::Quicklz, &[1]),
        ];
        let configs = pairs
            .into_iter()
            .flat_map(|(compression_type, levels)| {
                levels.iter().map(move |&level| CandidateConfig {
                    compression_type,
                    level,
                })
            })
            .collect();
        Self { configs }
    }

    /// Custom set; duplicates are dropped keeping the first occurrence.
    pub fn from_configs(configs: impl IntoIterator<Item = CandidateConfig>) -> Self {
        let mut unique = Vec::new();
        for config in configs {
            if !unique.contains(&config) {
                unique.push(config);
            }
        }
        Self { configs: unique }
    }

    /// Parse `TYPE_LEVEL` keys into a set.
    pub fn from_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self, ParseCandidateError> {
        let configs = keys
            .iter()
            .map(|key| key.as_ref().parse())
            .collect::<Result<Vec<CandidateConfig>, _>>()?;
        Ok(Self::from_configs(configs))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateConfig> {
        self.configs.iter()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn contains(&self, config: &CandidateConfig) -> bool {
        self.configs.contains(config)
    }
}

/// Relative compute cost per configuration, used to break near-ties in size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightTable {
    weights: HashMap<CandidateConfig, u32>,
}

impl WeightTable {
    /// Standard weights. RLE levels above 1 add a zlib pass, so their cost
    /// is RLE_TYPE_1 plus the matching zlib level.
    pub fn standard() -> Self {
        const QUICKLZ_1: u32 = 1;
        const ZLIB_1: u32 = 2;
        const ZLIB_5: u32 = 3;
        const ZLIB_9: u32 = 4;
        const RLE_TYPE_1: u32 = 3;

        let weights = [
            (CompressionType::Quicklz, 1, QUICKLZ_1),
            (CompressionType::Zlib, 1, ZLIB_1),
            (CompressionType::Zlib, 5, ZLIB_5),
            (CompressionType::Zlib, 9, ZLIB_9),
            (CompressionType::RleType, 1, RLE_TYPE_1),
            (CompressionType::RleType, 2, RLE_TYPE_1 + ZLIB_1),
            (CompressionType::RleType, 3, RLE_TYPE_1 + ZLIB_5),
            (CompressionType::RleType, 4, RLE_TYPE_1 + ZLIB_9),
        ]
        .into_iter()
        .map(|(compression_type, level, weight)| {
            (
                CandidateConfig {
                    compression_type,
                    level,
                },
                weight,
            )
        })
        .collect();

        Self { weights }
    }

    pub fn empty() -> Self {
        Self {
            weights: HashMap::new(),
        }
    }

    /// Weight of `config`, [`DEFAULT_WEIGHT`] when it has no entry.
    pub fn weight(&self, config: &CandidateConfig) -> u32 {
        self.weights.get(config).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn with_weight(mut self, config: CandidateConfig, weight: u32) -> Self {
        self.weights.insert(config, weight);
        self
    }

    /// Apply `TYPE_LEVEL -> weight` overrides from configuration.
    pub fn with_overrides(
        mut self,
        overrides: &BTreeMap<String, u32>,
    ) -> Result<Self, ParseCandidateError> {
        for (key, weight) in overrides {
            let config: CandidateConfig = key.parse()?;
            self.weights.insert(config, *weight);
        }
        Ok(self)
    }

    /// Entries sorted by configuration, for display.
    pub fn entries(&self) -> Vec<(CandidateConfig, u32)> {
        let mut entries: Vec<_> = self.weights.iter().map(|(c, w)| (*c, *w)).collect();
        entries.sort();
        entries
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(key: &str) -> CandidateConfig {
        key.parse().unwrap()
    }

    #[test]
    fn test_standard_set_order() {
        let set = CandidateSet::standard();
        let keys: Vec<String> = set.iter().map(|c| c.key()).collect();
        assert_eq!(
            keys,
            [
                "RLE_TYPE_1",
                "RLE_TYPE_2",
                "RLE_TYPE_3",
                "RLE_TYPE_4",
                "ZLIB_1",
                "ZLIB_5",
                "ZLIB_9",
                "QUICKLZ_1"
            ]
            .map(String::from)
        );
        assert_eq!(set.len(), 8);
    }

    #[test]
    fn test_from_keys_dedups_and_validates() {
        let set = CandidateSet::from_keys(&["ZLIB_1", "zlib_1", "QUICKLZ_1"]).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&config("QUICKLZ_1")));

        assert!(CandidateSet::from_keys(&["ZLIB_10"]).is_err());
    }

    #[test]
    fn test_standard_weights_are_derived() {
        let weights = WeightTable::standard();
        assert_eq!(weights.weight(&config("QUICKLZ_1")), 1);
        assert_eq!(weights.weight(&config("ZLIB_9")), 4);
        assert_eq!(weights.weight(&config("RLE_TYPE_1")), 3);
        assert_eq!(
            weights.weight(&config("RLE_TYPE_2")),
            weights.weight(&config("RLE_TYPE_1")) + weights.weight(&config("ZLIB_1"))
        );
        assert_eq!(weights.weight(&config("RLE_TYPE_3")), 6);
        assert_eq!(weights.weight(&config("RLE_TYPE_4")), 7);
    }

    #[test]
    fn test_missing_weight_falls_back_to_default() {
        let weights = WeightTable::standard();
        assert_eq!(weights.weight(&config("ZLIB_3")), DEFAULT_WEIGHT);
        assert_eq!(WeightTable::empty().weight(&config("ZLIB_9")), 5);
    }

    #[test]
    fn test_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert("ZLIB_9".to_string(), 10);
        overrides.insert("zlib_3".to_string(), 1);
        let weights = WeightTable::standard().with_overrides(&overrides).unwrap();
        assert_eq!(weights.weight(&config("ZLIB_9")), 10);
        assert_eq!(weights.weight(&config("ZLIB_3")), 1);
        assert_eq!(weights.weight(&config("ZLIB_1")), 2);

        overrides.insert("BOGUS_1".to_string(), 1);
        assert!(WeightTable::standard().with_overrides(&overrides).is_err());
    }
}
