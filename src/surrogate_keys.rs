// 🔑 Surrogate Key Resolver - map fact candidates onto warehouse-assigned keys
//
// Runs only after dimensions are persisted: keys come from reading the
// dimension tables back, never from insertion position.
// A miss is never fatal. It gets a documented default and is counted.

use crate::dimensions::{TrendKey, TrendSignals, FALLBACK_CATEGORY};
use crate::facts::FactCandidate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Key used for an unmatched trend tuple: the first inserted trend row
pub const DEFAULT_TREND_ID: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCategory {
    pub category_id: i64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTrend {
    pub trend_id: i64,
    pub signals: TrendSignals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedKeys {
    pub category_id: i64,
    pub trend_id: i64,
}

/// How often resolution fell back to a default key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySubstitutions {
    pub category_defaults: usize,
    pub trend_defaults: usize,
    /// Fact rows with at least one defaulted key
    pub rows_with_defaults: usize,
    pub total_rows: usize,
}

impl KeySubstitutions {
    pub fn ratio(&self) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            self.rows_with_defaults as f64 / self.total_rows as f64
        }
    }

    pub fn any(&self) -> bool {
        self.rows_with_defaults > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Aligned with the candidates passed to `resolve`
    pub keys: Vec<ResolvedKeys>,
    pub substitutions: KeySubstitutions,
}

pub struct SurrogateKeyResolver {
    categories: HashMap<String, i64>,
    trends: HashMap<TrendKey, i64>,
    fallback_category: Option<i64>,
}

impl SurrogateKeyResolver {
    pub fn new(categories: &[PersistedCategory], trends: &[PersistedTrend]) -> Self {
        let fallback_category = categories
            .iter()
            .find(|c| c.label == FALLBACK_CATEGORY)
            .or_else(|| categories.iter().min_by_key(|c| c.category_id))
            .map(|c| c.category_id);

        // first persisted id wins if the table ever held duplicate tuples
        let mut trend_map = HashMap::new();
        for trend in trends {
            trend_map.entry(trend.signals.key()).or_insert(trend.trend_id);
        }

        SurrogateKeyResolver {
            categories: categories
                .iter()
                .map(|c| (c.label.clone(), c.category_id))
                .collect(),
            trends: trend_map,
            fallback_category,
        }
    }

    pub fn resolve(&self, candidates: &[FactCandidate]) -> Resolution {
        let mut substitutions = KeySubstitutions {
            total_rows: candidates.len(),
            ..KeySubstitutions::default()
        };

        let keys = candidates
            .iter()
            .map(|candidate| {
                let category_id = self.categories.get(&candidate.category).copied();
                let trend_id = self.trends.get(&candidate.trend.key()).copied();

                if category_id.is_none() {
                    substitutions.category_defaults += 1;
                }
                if trend_id.is_none() {
                    substitutions.trend_defaults += 1;
                }
                if category_id.is_none() || trend_id.is_none() {
                    substitutions.rows_with_defaults += 1;
                }

                ResolvedKeys {
                    // an empty category table means there are no facts to key either
                    category_id: category_id.or(self.fallback_category).unwrap_or(0),
                    trend_id: trend_id.unwrap_or(DEFAULT_TREND_ID),
                }
            })
            .collect();

        if substitutions.any() {
            warn!(
                category_defaults = substitutions.category_defaults,
                trend_defaults = substitutions.trend_defaults,
                total = substitutions.total_rows,
                "surrogate key lookups fell back to default keys"
            );
        }

        Resolution { keys, substitutions }
    }
}

/// Resolve candidates against persisted dimension rows in one call
pub fn resolve(
    candidates: &[FactCandidate],
    categories: &[PersistedCategory],
    trends: &[PersistedTrend],
) -> Resolution {
    SurrogateKeyResolver::new(categories, trends).resolve(candidates)
}
