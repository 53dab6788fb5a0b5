use std::fmt;
use std::path::PathBuf;

use anyhow::Context;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use crate::configuration::LlmSettings;
use crate::domain::competitor::{DetailRecord, ScoredBatch, ScoredCompetitor};
use crate::domain::startup_profile::StartupProfile;

const MAX_SCORING_ATTEMPTS: u8 = 3;
const DESCRIPTION_PREVIEW_CHARS: usize = 50;

const SYSTEM_PROMPT: &str = r#"You are a JSON generator. Your ONLY task is to return a single valid JSON object.
The output MUST start with { and end with } and be parseable as JSON.
The output MUST NOT contain any text, explanations, markdown, or code fences.
All strings MUST use double quotes. Use the actual company names and data provided.
Give every competitor a feature_score between 0 and 10 measuring how closely its features match the startup's features; give 0 when most features do not match.
Give every competitor a valuation_score between 0 and 100 based on its details, features and popularity.
Include only competitors with a feature_score greater than 0 in the competitors array.
Feature scores should differ between competitors."#;

/// Violation of the LLM output contract. Carried back into the
/// conversation as a corrective instruction on retry.
#[derive(Debug)]
pub struct ContractViolation(pub String);

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Submits scraped records for scoring and appends each validated document
/// to the scoring-results store. The model is treated as an unreliable
/// structured-data producer: nothing is trusted without re-validation, and
/// a batch that never validates is dropped rather than failing the run.
pub struct ScoringClient {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    store_path: PathBuf,
}

impl ScoringClient {
    pub fn new(settings: &LlmSettings, store_path: PathBuf) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(settings.api_key.clone())
            .with_api_base(settings.api_base.clone());

        ScoringClient {
            client: Client::with_config(config),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            store_path,
        }
    }

    pub async fn score(
        &self,
        startup: &StartupProfile,
        batch: &[DetailRecord],
    ) -> Vec<ScoredCompetitor> {
        let mut messages = match build_messages(startup, batch) {
            Ok(messages) => messages,
            Err(e) => {
                log::error!("Failed to build scoring request: {:?}", e);
                return vec![];
            }
        };

        for attempt in 1..=MAX_SCORING_ATTEMPTS {
            let content = match self.complete(messages.clone()).await {
                Ok(content) => content,
                Err(e) => {
                    log::error!("Scoring request attempt {} failed: {:?}", attempt, e);
                    continue;
                }
            };

            let sanitized = sanitize_response(&content);
            match validate_scoring_document(&sanitized) {
                Ok((document, scored)) => {
                    if let Err(e) = self.append_to_store(&document).await {
                        log::error!("Failed to append scoring document: {:?}", e);
                    }
                    return scored.competitors;
                }
                Err(violation) => {
                    log::warn!(
                        "Scoring contract violation on attempt {}: {}",
                        attempt,
                        violation
                    );
                    match corrective_message(&violation) {
                        Ok(message) => messages.push(message),
                        Err(e) => log::error!("Failed to build corrective message: {:?}", e),
                    }
                }
            }
        }

        log::error!(
            "No valid scoring document after {} attempts, skipping batch",
            MAX_SCORING_ATTEMPTS
        );
        vec![]
    }

    async fn complete(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> anyhow::Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(messages)
            .max_tokens(self.max_tokens)
            .build()?;

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .context("No choices in scoring response")?
            .message
            .content
            .clone()
            .context("No content in scoring response")
    }

    /// The store accumulates one JSON document per validated batch,
    /// concatenated across runs; the reconciler stream-decodes it.
    async fn append_to_store(&self, document: &Value) -> anyhow::Result<()> {
        if let Some(parent) = self.store_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create scoring store directory")?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.store_path)
            .await
            .context("Failed to open scoring store")?;

        let body = serde_json::to_string_pretty(document)
            .context("Failed to serialize scoring document")?;
        file.write_all(body.as_bytes()).await?;
        file.write_all(b"\n").await?;

        Ok(())
    }
}

#[derive(Serialize)]
struct StartupInfo<'a> {
    name: &'a str,
    desc: String,
    feat: Vec<String>,
    price: &'a str,
    users: &'a [String],
}

#[derive(Serialize)]
struct CompetitorInfo {
    n: String,
    d: String,
    w: String,
    f: Vec<String>,
    fd: String,
    funding_amount: f64,
    ad: CompetitorExtras,
}

#[derive(Serialize)]
struct CompetitorExtras {
    #[serde(rename = "type")]
    kind: String,
    employees: String,
    location: String,
    investors: Vec<String>,
    status: String,
    deal_amount: String,
}

fn build_messages(
    startup: &StartupProfile,
    batch: &[DetailRecord],
) -> anyhow::Result<Vec<ChatCompletionRequestMessage>> {
    let startup_info = StartupInfo {
        name: &startup.title,
        desc: truncate_chars(&startup.description, DESCRIPTION_PREVIEW_CHARS),
        feat: derive_features(&startup.solution),
        price: if startup.monetization.is_empty() {
            &startup.business_model
        } else {
            &startup.monetization
        },
        users: &startup.target_users,
    };
    let competitors_info: Vec<CompetitorInfo> = batch.iter().map(condense_record).collect();

    let user_prompt = format!(
        r#"Return ONLY a valid JSON object with this EXACT structure, using the actual data provided:

{{
  "competitors": [
    {{
      "name": "company_name",
      "description": "detailed_description",
      "website": "company_website",
      "features": ["feature1", "feature2"],
      "funding": "funding_amount",
      "feature_score": 0,
      "valuation_score": 0,
      "details": {{
        "type": "company_type",
        "employees": "employee_count",
        "location": "company_location",
        "investors": ["investor1", "investor2"],
        "status": "company_status",
        "deal_amount": "latest_deal_amount"
      }}
    }}
  ],
  "market_analysis": {{
    "total_market_size": "market_size_value",
    "growth_rate": "growth_rate_value",
    "key_trends": ["trend1", "trend2"]
  }},
  "collaboration_opportunities": ["opportunity1", "opportunity2"]
}}

Data to analyze:
Startup: {}
Competitors: {}

IMPORTANT:
1. Return ONLY the JSON object, nothing before or after it
2. feature_score is a number between 0 and 10, valuation_score a number between 0 and 100
3. Include every competitor whose feature_score is greater than 0
4. Replace all placeholder values with actual data from the input
5. Keep descriptions and features concise to stay within token limits"#,
        serde_json::to_string(&startup_info)?,
        serde_json::to_string(&competitors_info)?,
    );

    let system = ChatCompletionRequestSystemMessageArgs::default()
        .content(SYSTEM_PROMPT)
        .build()?
        .into();
    let user = ChatCompletionRequestUserMessageArgs::default()
        .content(user_prompt)
        .build()?
        .into();

    Ok(vec![system, user])
}

fn corrective_message(
    violation: &ContractViolation,
) -> anyhow::Result<ChatCompletionRequestMessage> {
    let content = format!(
        "Your previous reply violated the output contract: {}. Reply again with ONLY the corrected JSON object and nothing else.",
        violation
    );

    Ok(ChatCompletionRequestUserMessageArgs::default()
        .content(content)
        .build()?
        .into())
}

fn condense_record(record: &DetailRecord) -> CompetitorInfo {
    let details = &record.details;
    let description = truncate_chars(
        &detail_text(details, "Description"),
        DESCRIPTION_PREVIEW_CHARS,
    );

    let funding_key = format!(
        "How much funding has {} raised over time?",
        record.company_name
    );
    let funding_info = detail_text(details, &funding_key);

    let investors_key = format!("Who are {}'s investors?", record.company_name);
    let investors: Vec<String> = detail_text(details, &investors_key)
        .split(',')
        .map(|inv| inv.trim().to_string())
        .filter(|inv| !inv.is_empty())
        .take(2)
        .collect();

    let location = details
        .get("Address")
        .and_then(Value::as_array)
        .and_then(|lines| lines.first())
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    CompetitorInfo {
        n: record.company_name.clone(),
        d: description.clone(),
        w: detail_text(details, "Website"),
        f: derive_features(&description),
        funding_amount: first_number(&funding_info).unwrap_or(0.0),
        fd: funding_info,
        ad: CompetitorExtras {
            kind: detail_text(details, "Primary Industry"),
            employees: detail_text(details, "Employees"),
            location,
            investors,
            status: detail_text(details, "Status"),
            deal_amount: detail_text(details, "Latest Deal Amount"),
        },
    }
}

fn detail_text(details: &serde_json::Map<String, Value>, key: &str) -> String {
    details
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// First sentence of the description stands in for a feature list when the
/// scrape produced no explicit one.
fn derive_features(description: &str) -> Vec<String> {
    let features: Vec<String> = description
        .split('.')
        .map(str::trim)
        .filter(|sentence| sentence.len() > 10)
        .take(1)
        .map(str::to_string)
        .collect();

    if features.is_empty() {
        vec!["Core Service".to_string()]
    } else {
        features
    }
}

/// Pulls the first number out of free text like "raised $12.5M over 3 rounds".
fn first_number(text: &str) -> Option<f64> {
    let mut digits = String::new();
    let mut seen_dot = false;

    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if c == '.' && !digits.is_empty() && !seen_dot {
            seen_dot = true;
            digits.push(c);
        } else if !digits.is_empty() {
            break;
        }
    }

    digits.trim_end_matches('.').parse().ok()
}

/// Strips code fences and coerces the reply to brace-delimited text before
/// parsing. Models routinely wrap JSON or drop the outer braces.
fn sanitize_response(raw: &str) -> String {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let mut cleaned = cleaned.trim().to_string();

    if !cleaned.starts_with('{') {
        cleaned = format!("{{{}", cleaned);
    }
    if !cleaned.ends_with('}') {
        cleaned = format!("{}}}", cleaned);
    }

    cleaned
}

fn coerce_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(fields)) => fields.is_empty(),
        Some(_) => false,
    }
}

/// Re-validates the model's reply independently of the prompt contract:
/// required top-level keys, required per-competitor fields, score ranges.
/// Score fields are normalized to numbers in the returned document so the
/// store never carries stringified scores.
pub fn validate_scoring_document(
    raw: &str,
) -> Result<(Value, ScoredBatch), ContractViolation> {
    let mut document: Value = serde_json::from_str(raw)
        .map_err(|e| ContractViolation(format!("the reply was not valid JSON ({})", e)))?;

    let object = document
        .as_object_mut()
        .ok_or_else(|| ContractViolation("the reply must be a JSON object".to_string()))?;

    for key in [
        "competitors",
        "market_analysis",
        "collaboration_opportunities",
    ] {
        if value_is_missing(object.get(key)) {
            return Err(ContractViolation(format!(
                "required key \"{}\" is missing or empty",
                key
            )));
        }
    }

    let competitors = object
        .get_mut("competitors")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| ContractViolation("\"competitors\" must be an array".to_string()))?;

    for competitor in competitors.iter_mut() {
        let fields = competitor.as_object_mut().ok_or_else(|| {
            ContractViolation("every competitor must be a JSON object".to_string())
        })?;

        if value_is_missing(fields.get("name")) {
            return Err(ContractViolation(
                "every competitor needs a non-empty \"name\"".to_string(),
            ));
        }

        for (field, max) in [("feature_score", 10.0), ("valuation_score", 100.0)] {
            let value = fields.get(field).ok_or_else(|| {
                ContractViolation(format!("competitor is missing \"{}\"", field))
            })?;
            let score = coerce_score(value).ok_or_else(|| {
                ContractViolation(format!("\"{}\" must be a number", field))
            })?;
            if !(0.0..=max).contains(&score) {
                return Err(ContractViolation(format!(
                    "\"{}\" must be between 0 and {}",
                    field, max
                )));
            }
            fields.insert(field.to_string(), json!(score));
        }
    }

    let batch: ScoredBatch = serde_json::from_value(document.clone())
        .map_err(|e| ContractViolation(format!("malformed scoring document ({})", e)))?;

    Ok((document, batch))
}

#[cfg(test)]
mod tests {
    use super::{
        derive_features, first_number, sanitize_response, truncate_chars,
        validate_scoring_document,
    };

    fn valid_document() -> String {
        r#"{
            "competitors": [
                {"name": "Acme", "feature_score": 8, "valuation_score": 70}
            ],
            "market_analysis": {"total_market_size": "1B"},
            "collaboration_opportunities": ["co-marketing"]
        }"#
        .to_string()
    }

    #[test]
    fn sanitize_strips_fences_and_coerces_braces() {
        assert_eq!(
            sanitize_response("```json\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
        assert_eq!(sanitize_response("\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(sanitize_response("{\"a\": 1"), "{\"a\": 1}");
    }

    #[test]
    fn valid_document_passes() {
        let (_, batch) = validate_scoring_document(&valid_document()).unwrap();

        assert_eq!(batch.competitors.len(), 1);
        assert_eq!(batch.competitors[0].name, "Acme");
        assert_eq!(batch.competitors[0].feature_score, 8.0);
        assert_eq!(batch.competitors[0].valuation_score, 70.0);
    }

    #[test]
    fn stringified_scores_are_coerced_to_numbers() {
        let raw = r#"{
            "competitors": [
                {"name": "Acme", "feature_score": "7", "valuation_score": "65.5"}
            ],
            "market_analysis": {"growth_rate": "12%"},
            "collaboration_opportunities": ["integrations"]
        }"#;

        let (document, batch) = validate_scoring_document(raw).unwrap();

        assert_eq!(batch.competitors[0].feature_score, 7.0);
        assert_eq!(batch.competitors[0].valuation_score, 65.5);
        assert!(document["competitors"][0]["feature_score"].is_number());
    }

    #[test]
    fn missing_top_level_key_is_rejected() {
        let raw = r#"{"competitors": [{"name": "Acme", "feature_score": 5, "valuation_score": 50}]}"#;
        assert!(validate_scoring_document(raw).is_err());
    }

    #[test]
    fn empty_competitors_array_is_rejected() {
        let raw = r#"{
            "competitors": [],
            "market_analysis": {"a": "b"},
            "collaboration_opportunities": ["c"]
        }"#;
        assert!(validate_scoring_document(raw).is_err());
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        let raw = valid_document().replace("\"feature_score\": 8", "\"feature_score\": 11");
        assert!(validate_scoring_document(&raw).is_err());

        let raw = valid_document().replace("\"valuation_score\": 70", "\"valuation_score\": -3");
        assert!(validate_scoring_document(&raw).is_err());
    }

    #[test]
    fn competitor_without_name_is_rejected() {
        let raw = valid_document().replace("\"name\": \"Acme\", ", "");
        assert!(validate_scoring_document(&raw).is_err());
    }

    #[test]
    fn non_json_reply_is_rejected() {
        assert!(validate_scoring_document("here are your competitors!").is_err());
    }

    #[test]
    fn first_number_reads_leading_figure() {
        assert_eq!(first_number("raised $12.5M over 3 rounds"), Some(12.5));
        assert_eq!(first_number("no figures here"), None);
        assert_eq!(first_number("around 40 crore."), Some(40.0));
    }

    #[test]
    fn derive_features_uses_first_long_sentence() {
        assert_eq!(
            derive_features("Acme builds rugged warehouse robots. Also sells parts."),
            vec!["Acme builds rugged warehouse robots"]
        );
        assert_eq!(derive_features("Short."), vec!["Core Service"]);
    }

    #[test]
    fn truncate_is_character_safe() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hé", 2), "hé");
    }
}
