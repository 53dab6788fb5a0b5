use serde::{Deserialize, Serialize};

/// The founder's idea as produced by the intake interview. The pipeline
/// treats this as read-only input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupProfile {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub target_users: Vec<String>,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub business_model: String,
    #[serde(default)]
    pub monetization: String,
    #[serde(default)]
    pub competition: String,
    #[serde(default)]
    pub differentiator: String,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub vision: String,
}

/// Labels guessed by the domain classifier, used to build seed queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainInfo {
    pub major_domain: String,
    pub domain_search: String,
    pub best_title: String,
}

impl DomainInfo {
    pub fn unknown() -> Self {
        DomainInfo {
            major_domain: "Unknown".to_string(),
            domain_search: "Unknown".to_string(),
            best_title: "Unknown".to_string(),
        }
    }
}
