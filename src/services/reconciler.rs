use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{json, Value};
use strsim::jaro_winkler;

use crate::configuration::ArtifactSettings;
use crate::domain::competitor::{
    details_non_empty, normalize_join_key, DetailRecord, RankedResult,
};

const NO_COMPETITORS_MESSAGE: &str =
    "No competitors found! Remember: the only competition you have is with yourself. Keep innovating!";

/// Similarity above which an unmatched scored name is reported with its
/// closest raw company name.
const NEAR_MISS_SIMILARITY: f64 = 0.85;

#[derive(Debug, Clone)]
struct CompetitorScore {
    name: String,
    feature_score: f64,
    valuation_score: f64,
}

/// Joins LLM scores back onto raw scraped records and writes the final
/// ranked artifact. Sole reader of the raw-output and scoring stores, sole
/// writer of the final artifact; deterministic for fixed inputs.
pub struct ResultReconciler {
    raw_output_path: PathBuf,
    scoring_store_path: PathBuf,
    final_output_path: PathBuf,
    feature_score_threshold: f64,
    empty_detail_fields: Vec<String>,
}

impl ResultReconciler {
    pub fn new(settings: &ArtifactSettings) -> Self {
        ResultReconciler {
            raw_output_path: PathBuf::from(&settings.raw_output_path),
            scoring_store_path: PathBuf::from(&settings.scoring_store_path),
            final_output_path: PathBuf::from(&settings.final_output_path),
            feature_score_threshold: settings.feature_score_threshold,
            empty_detail_fields: settings.empty_detail_fields.clone(),
        }
    }

    pub async fn reconcile(&self) -> anyhow::Result<Vec<RankedResult>> {
        // A missing store just means no batch ever validated.
        let store_text = tokio::fs::read_to_string(&self.scoring_store_path)
            .await
            .unwrap_or_default();
        let documents = parse_concatenated_documents(&store_text);
        let scores = flatten_competitor_scores(&documents);

        let raw_text = tokio::fs::read_to_string(&self.raw_output_path)
            .await
            .context("Failed to read raw output artifact")?;
        let records: Vec<DetailRecord> =
            serde_json::from_str(&raw_text).context("Failed to parse raw output artifact")?;

        let ranked = join_and_rank(
            &records,
            &scores,
            self.feature_score_threshold,
            &self.empty_detail_fields,
        );

        log_unmatched_scores(&records, &scores);

        write_final_artifact(&ranked, &self.final_output_path).await?;

        Ok(ranked)
    }
}

/// The scoring store is a concatenation of independent JSON documents, not
/// an array, so it must be decoded incrementally. A trailing partial
/// document (interrupted write) is dropped rather than poisoning the rest.
fn parse_concatenated_documents(store_text: &str) -> Vec<Value> {
    let mut documents = vec![];
    let mut stream = serde_json::Deserializer::from_str(store_text).into_iter::<Value>();

    loop {
        match stream.next() {
            Some(Ok(document)) => documents.push(document),
            Some(Err(e)) => {
                log::warn!("Stopped decoding scoring store early: {:?}", e);
                break;
            }
            None => break,
        }
    }

    documents
}

/// Flattens every `competitors` entry across all documents, keyed by
/// normalized name. Later documents win on duplicate names; missing scores
/// default to 0.
fn flatten_competitor_scores(documents: &[Value]) -> HashMap<String, CompetitorScore> {
    let mut scores = HashMap::new();

    for document in documents {
        let Some(competitors) = document.get("competitors").and_then(Value::as_array) else {
            continue;
        };
        for competitor in competitors {
            let Some(name) = competitor.get("name").and_then(Value::as_str) else {
                continue;
            };
            scores.insert(
                normalize_join_key(name),
                CompetitorScore {
                    name: name.to_string(),
                    feature_score: score_value(competitor.get("feature_score")),
                    valuation_score: score_value(competitor.get("valuation_score")),
                },
            );
        }
    }

    scores
}

fn score_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn join_and_rank(
    records: &[DetailRecord],
    scores: &HashMap<String, CompetitorScore>,
    feature_score_threshold: f64,
    empty_detail_fields: &[String],
) -> Vec<RankedResult> {
    let mut ranked: Vec<RankedResult> = records
        .iter()
        .filter_map(|record| {
            let score = scores.get(&normalize_join_key(&record.company_name))?;
            if score.feature_score <= feature_score_threshold {
                return None;
            }
            if !details_non_empty(&record.details, empty_detail_fields) {
                return None;
            }
            Some(RankedResult {
                record: record.clone(),
                feature_score: score.feature_score,
                valuation_score: score.valuation_score,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.valuation_score
            .total_cmp(&a.valuation_score)
            .then(b.feature_score.total_cmp(&a.feature_score))
    });

    ranked
}

/// A scored name with no matching raw record is a diagnosable condition,
/// not an error; the join is string-keyed and brittle by nature.
fn log_unmatched_scores(records: &[DetailRecord], scores: &HashMap<String, CompetitorScore>) {
    for (key, score) in scores {
        if records
            .iter()
            .any(|record| normalize_join_key(&record.company_name) == *key)
        {
            continue;
        }

        let near_miss = records
            .iter()
            .map(|record| {
                (
                    jaro_winkler(&record.company_name, &score.name),
                    record.company_name.as_str(),
                )
            })
            .filter(|(similarity, _)| *similarity >= NEAR_MISS_SIMILARITY)
            .max_by(|(a, _), (b, _)| a.total_cmp(b));

        match near_miss {
            Some((similarity, candidate)) => log::warn!(
                "Scored competitor \"{}\" matched no raw record; closest is \"{}\" ({:.2})",
                score.name,
                candidate,
                similarity
            ),
            None => log::warn!(
                "Scored competitor \"{}\" matched no raw record",
                score.name
            ),
        }
    }
}

/// An empty result set writes an explicit placeholder object so callers can
/// tell "nothing qualified" from a failed run.
async fn write_final_artifact(ranked: &[RankedResult], path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create final output directory")?;
    }

    let body = if ranked.is_empty() {
        serde_json::to_string_pretty(&json!({ "message": NO_COMPETITORS_MESSAGE }))
    } else {
        serde_json::to_string_pretty(ranked)
    }
    .context("Failed to serialize final artifact")?;

    tokio::fs::write(path, body)
        .await
        .context("Failed to write final artifact")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;
    use uuid::Uuid;

    use crate::configuration::ArtifactSettings;

    use super::{flatten_competitor_scores, parse_concatenated_documents, ResultReconciler};

    struct TempArtifacts {
        settings: ArtifactSettings,
    }

    impl TempArtifacts {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("foundrscan-test-{}", Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();

            TempArtifacts {
                settings: ArtifactSettings {
                    raw_output_path: dir.join("raw.json").to_string_lossy().into_owned(),
                    scoring_store_path: dir.join("scores.json").to_string_lossy().into_owned(),
                    final_output_path: dir.join("final.json").to_string_lossy().into_owned(),
                    empty_detail_fields: ["Social Media", "Industries", "Verticals"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                    feature_score_threshold: 0.0,
                },
            }
        }

        fn write_raw(&self, body: &str) {
            std::fs::write(&self.settings.raw_output_path, body).unwrap();
        }

        fn write_scores(&self, body: &str) {
            std::fs::write(&self.settings.scoring_store_path, body).unwrap();
        }

        fn read_final(&self) -> String {
            std::fs::read_to_string(&self.settings.final_output_path).unwrap()
        }
    }

    impl Drop for TempArtifacts {
        fn drop(&mut self) {
            if let Some(dir) = PathBuf::from(&self.settings.raw_output_path).parent() {
                _ = std::fs::remove_dir_all(dir);
            }
        }
    }

    #[test]
    fn concatenated_documents_are_all_decoded() {
        let store = r#"{"competitors": [{"name": "Acme"}]}
            {"competitors": [{"name": "Beta"}]}"#;

        let documents = parse_concatenated_documents(store);
        assert_eq!(documents.len(), 2);
    }

    #[test]
    fn trailing_partial_document_is_dropped() {
        let store = r#"{"competitors": [{"name": "Acme"}]}
            {"competitors": [{"name": "Bet"#;

        let documents = parse_concatenated_documents(store);
        assert_eq!(documents.len(), 1);
    }

    #[test]
    fn flatten_merges_across_documents_and_defaults_missing_scores() {
        let documents = vec![
            json!({"competitors": [{"name": "Acme", "feature_score": 8, "valuation_score": 70}]}),
            json!({"competitors": [{"name": "Beta"}]}),
        ];

        let scores = flatten_competitor_scores(&documents);

        assert_eq!(scores.len(), 2);
        assert_eq!(scores["acme"].feature_score, 8.0);
        assert_eq!(scores["beta"].feature_score, 0.0);
        assert_eq!(scores["beta"].valuation_score, 0.0);
    }

    #[tokio::test]
    async fn scored_record_with_substantive_details_is_ranked() {
        let artifacts = TempArtifacts::new();
        artifacts.write_raw(
            r#"[{"company_name": "Acme", "searched_url": "https://x/acme",
                 "details": {"Description": "Acme builds widgets"}}]"#,
        );
        artifacts.write_scores(
            r#"{"competitors": [{"name": "Acme", "feature_score": 8, "valuation_score": 70}]}"#,
        );

        let ranked = ResultReconciler::new(&artifacts.settings)
            .reconcile()
            .await
            .unwrap();

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].record.company_name, "Acme");
        assert_eq!(ranked[0].feature_score, 8.0);
        assert_eq!(ranked[0].valuation_score, 70.0);

        let final_body: serde_json::Value =
            serde_json::from_str(&artifacts.read_final()).unwrap();
        assert_eq!(final_body[0]["company_name"], "Acme");
        assert_eq!(final_body[0]["valuation_score"], 70.0);
    }

    #[tokio::test]
    async fn record_with_only_incidental_details_is_excluded() {
        let artifacts = TempArtifacts::new();
        artifacts.write_raw(
            r#"[{"company_name": "Hollow", "searched_url": "https://x/hollow",
                 "details": {"Social Media": {}, "Industries": []}}]"#,
        );
        artifacts.write_scores(
            r#"{"competitors": [{"name": "Hollow", "feature_score": 9, "valuation_score": 90}]}"#,
        );

        let ranked = ResultReconciler::new(&artifacts.settings)
            .reconcile()
            .await
            .unwrap();

        assert!(ranked.is_empty());
    }

    #[tokio::test]
    async fn competitors_from_every_concatenated_document_are_joined() {
        let artifacts = TempArtifacts::new();
        artifacts.write_raw(
            r#"[{"company_name": "Acme", "searched_url": "u1", "details": {"Description": "a"}},
                {"company_name": "Beta", "searched_url": "u2", "details": {"Description": "b"}}]"#,
        );
        artifacts.write_scores(
            r#"{"competitors": [{"name": "Acme", "feature_score": 4, "valuation_score": 40}]}
               {"competitors": [{"name": "Beta", "feature_score": 6, "valuation_score": 80}]}"#,
        );

        let ranked = ResultReconciler::new(&artifacts.settings)
            .reconcile()
            .await
            .unwrap();

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].record.company_name, "Beta");
        assert_eq!(ranked[1].record.company_name, "Acme");
    }

    #[tokio::test]
    async fn no_qualifying_records_writes_placeholder_object() {
        let artifacts = TempArtifacts::new();
        artifacts.write_raw(
            r#"[{"company_name": "Acme", "searched_url": "u1", "details": {"Description": "a"}}]"#,
        );
        artifacts.write_scores(r#"{"competitors": [{"name": "Unrelated", "feature_score": 8, "valuation_score": 70}]}"#);

        let ranked = ResultReconciler::new(&artifacts.settings)
            .reconcile()
            .await
            .unwrap();

        assert!(ranked.is_empty());
        let final_body: serde_json::Value =
            serde_json::from_str(&artifacts.read_final()).unwrap();
        assert!(final_body["message"].is_string());
    }

    #[tokio::test]
    async fn ranking_sorts_by_valuation_then_feature_score() {
        let artifacts = TempArtifacts::new();
        artifacts.write_raw(
            r#"[{"company_name": "A", "searched_url": "u", "details": {"Description": "x"}},
                {"company_name": "B", "searched_url": "u", "details": {"Description": "x"}},
                {"company_name": "C", "searched_url": "u", "details": {"Description": "x"}}]"#,
        );
        artifacts.write_scores(
            r#"{"competitors": [
                {"name": "A", "feature_score": 3, "valuation_score": 50},
                {"name": "B", "feature_score": 9, "valuation_score": 50},
                {"name": "C", "feature_score": 1, "valuation_score": 80}
            ]}"#,
        );

        let ranked = ResultReconciler::new(&artifacts.settings)
            .reconcile()
            .await
            .unwrap();

        let order: Vec<&str> = ranked
            .iter()
            .map(|r| r.record.company_name.as_str())
            .collect();
        assert_eq!(order, vec!["C", "B", "A"]);

        for pair in ranked.windows(2) {
            assert!(pair[0].valuation_score >= pair[1].valuation_score);
            if pair[0].valuation_score == pair[1].valuation_score {
                assert!(pair[0].feature_score >= pair[1].feature_score);
            }
        }
    }

    #[tokio::test]
    async fn reconciliation_is_idempotent() {
        let artifacts = TempArtifacts::new();
        artifacts.write_raw(
            r#"[{"company_name": "Acme", "searched_url": "u", "details": {"Description": "a"}},
                {"company_name": "Beta", "searched_url": "u", "details": {"Description": "b"}}]"#,
        );
        artifacts.write_scores(
            r#"{"competitors": [
                {"name": "Acme", "feature_score": 4, "valuation_score": 40},
                {"name": "Beta", "feature_score": 6, "valuation_score": 80}
            ]}"#,
        );

        let reconciler = ResultReconciler::new(&artifacts.settings);
        reconciler.reconcile().await.unwrap();
        let first = artifacts.read_final();
        reconciler.reconcile().await.unwrap();
        let second = artifacts.read_final();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn join_normalizes_case_and_punctuation() {
        let artifacts = TempArtifacts::new();
        artifacts.write_raw(
            r#"[{"company_name": "Acme, Inc.", "searched_url": "u", "details": {"Description": "a"}}]"#,
        );
        artifacts.write_scores(
            r#"{"competitors": [{"name": "acme inc", "feature_score": 5, "valuation_score": 55}]}"#,
        );

        let ranked = ResultReconciler::new(&artifacts.settings)
            .reconcile()
            .await
            .unwrap();

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].record.company_name, "Acme, Inc.");
    }
}
