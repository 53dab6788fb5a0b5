use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw scrape result for one company profile page. Immutable once built;
/// `company_name` is the join key against LLM scoring output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetailRecord {
    pub company_name: String,
    pub searched_url: String,
    pub details: Map<String, Value>,
}

/// One competitor judgment from a validated LLM scoring document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredCompetitor {
    pub name: String,
    pub feature_score: f64,
    pub valuation_score: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A full validated scoring document, as appended to the scoring store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredBatch {
    pub competitors: Vec<ScoredCompetitor>,
    pub market_analysis: Value,
    pub collaboration_opportunities: Value,
}

/// Final reconciled record: raw details plus the matched scores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedResult {
    #[serde(flatten)]
    pub record: DetailRecord,
    pub feature_score: f64,
    pub valuation_score: f64,
}

/// Normalizes a company name so that independently-produced `name` and
/// `company_name` strings can be joined despite case, punctuation and
/// whitespace drift.
pub fn normalize_join_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A record whose details carry nothing outside the allow-listed
/// incidental-metadata fields is treated as empty and excluded from the
/// final ranking.
pub fn details_non_empty(details: &Map<String, Value>, allow_empty_fields: &[String]) -> bool {
    details
        .iter()
        .filter(|(key, _)| !allow_empty_fields.iter().any(|f| f == *key))
        .any(|(_, value)| !value_is_empty(value))
}

fn value_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
