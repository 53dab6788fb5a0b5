use serde_aux::field_attributes::deserialize_number_from_string;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub search: SearchSettings,
    pub llm: LlmSettings,
    pub scraper: ScraperSettings,
    pub artifacts: ArtifactSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
}

#[derive(serde::Deserialize, Clone)]
pub struct SearchSettings {
    pub scraperapi_key: String,
    pub tavily_api_key: String,
    pub google_credentials: Vec<GoogleCredential>,
}

/// One Google Custom Search account pair. Requests are spread round-robin
/// across all configured pairs to stay under per-account quotas.
#[derive(serde::Deserialize, Clone, Debug, PartialEq)]
pub struct GoogleCredential {
    pub api_key: String,
    pub cse_id: String,
}

#[derive(serde::Deserialize, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_tokens: u32,
}

#[derive(serde::Deserialize, Clone)]
pub struct ScraperSettings {
    pub webdriver_url: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub worker_count: usize,
    /// Attempts shared by the proxy and cookie tiers before the browser
    /// tier is used.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub fetch_retries: u8,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub request_timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub page_settle_secs: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_candidates: usize,
}

#[derive(serde::Deserialize, Clone)]
pub struct ArtifactSettings {
    pub raw_output_path: String,
    pub scoring_store_path: String,
    pub final_output_path: String,
    /// Detail fields that are allowed to be empty without making the whole
    /// record count as empty. Product decision, not a constant.
    pub empty_detail_fields: Vec<String>,
    pub feature_score_threshold: f64,
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");

    let settings = config::Config::builder()
        .add_source(config::File::from(base_path.join("configuration.yaml")))
        .add_source(
            config::Environment::with_prefix("FOUNDRSCAN")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
