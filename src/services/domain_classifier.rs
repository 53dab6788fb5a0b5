use anyhow::Context;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};

use crate::configuration::LlmSettings;
use crate::domain::startup_profile::{DomainInfo, StartupProfile};

const CLASSIFIER_SYSTEM_PROMPT: &str = "You are a domain classification and naming assistant. \
Always respond in JSON format with major_domain, domain_search, and best_title fields.";

/// Guesses industry labels for a startup profile with a single LLM call.
/// Failures fall back to Unknown labels; seed queries built from Unknown
/// still resolve to something, so this never aborts the pipeline.
pub struct DomainClassifier {
    client: Client<OpenAIConfig>,
    model: String,
}

impl DomainClassifier {
    pub fn new(settings: &LlmSettings) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(settings.api_key.clone())
            .with_api_base(settings.api_base.clone());

        DomainClassifier {
            client: Client::with_config(config),
            model: settings.model.clone(),
        }
    }

    pub async fn classify(&self, profile: &StartupProfile) -> DomainInfo {
        match self.try_classify(profile).await {
            Ok(info) => info,
            Err(e) => {
                log::error!("Domain classification failed: {:?}", e);
                DomainInfo::unknown()
            }
        }
    }

    async fn try_classify(&self, profile: &StartupProfile) -> anyhow::Result<DomainInfo> {
        let profile_json =
            serde_json::to_string_pretty(profile).context("Failed to serialize profile")?;

        let user_prompt = format!(
            r#"You are an expert in analyzing startup and tech data. Your task is to:

1. Carefully read the provided JSON data about a startup.
2. Return the following information in JSON format:
   - major_domain: The main domain/industry this startup operates in (one word, e.g. "AI", "Fintech", "Telemedicine").
   - domain_search: The most specific subdomain or focus area (one word, e.g. "Diabetes").
   - best_title: The most specific, unique and apt title for this startup idea. Avoid generic names.

JSON data to analyze:
{}

Respond like this:
{{
    "major_domain": "",
    "domain_search": "",
    "best_title": ""
}}"#,
            profile_json
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(CLASSIFIER_SYSTEM_PROMPT)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_prompt)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;
        let content = response
            .choices
            .first()
            .context("No choices in classifier response")?
            .message
            .content
            .clone()
            .context("No content in classifier response")?;

        parse_domain_info(&content)
    }
}

fn parse_domain_info(content: &str) -> anyhow::Result<DomainInfo> {
    let cleaned = content
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string();

    serde_json::from_str::<DomainInfo>(&cleaned).context("Classifier reply was not valid JSON")
}
