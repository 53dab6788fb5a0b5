use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::configuration::Settings;
use crate::domain::startup_profile::{DomainInfo, StartupProfile};

use super::{
    CredentialPool, DetailScraper, DomainClassifier, ResultReconciler, ScoringClient,
    ScrapeOrchestrator, SearchResolver,
};

/// End-to-end competitor analysis for one startup profile:
/// classify domain -> scrape -> score -> reconcile. Shared across requests;
/// all runs write to the same configured artifact paths, so `run_lock`
/// serializes them and a second job waits for the first to finish.
pub struct AnalysisPipeline {
    classifier: DomainClassifier,
    orchestrator: ScrapeOrchestrator,
    scoring: ScoringClient,
    reconciler: ResultReconciler,
    raw_output_path: PathBuf,
    scoring_store_path: PathBuf,
    run_lock: Mutex<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub competitor_count: usize,
}

impl AnalysisPipeline {
    pub fn new(configuration: &Settings) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(configuration.scraper.request_timeout_secs);

        let resolver = Arc::new(SearchResolver::new(&configuration.search, timeout)?);
        let scraper = Arc::new(DetailScraper::new(
            &configuration.scraper,
            configuration.search.scraperapi_key.clone(),
        )?);
        let credentials = Arc::new(CredentialPool::new(
            configuration.search.google_credentials.clone(),
        )?);

        let orchestrator = ScrapeOrchestrator::new(
            resolver,
            scraper,
            credentials,
            &configuration.scraper,
            configuration.search.scraperapi_key.clone(),
            PathBuf::from(&configuration.artifacts.raw_output_path),
        )?;

        Ok(AnalysisPipeline {
            classifier: DomainClassifier::new(&configuration.llm),
            orchestrator,
            scoring: ScoringClient::new(
                &configuration.llm,
                PathBuf::from(&configuration.artifacts.scoring_store_path),
            ),
            reconciler: ResultReconciler::new(&configuration.artifacts),
            raw_output_path: PathBuf::from(&configuration.artifacts.raw_output_path),
            scoring_store_path: PathBuf::from(&configuration.artifacts.scoring_store_path),
            run_lock: Mutex::new(()),
        })
    }

    pub async fn run(&self, profile: StartupProfile) -> anyhow::Result<AnalysisSummary> {
        // Held for the whole run; the stores must never see two writers.
        let _running = self.run_lock.lock().await;

        let domain_info = self.classifier.classify(&profile).await;
        log::info!(
            "Classified \"{}\" as major domain {}, search domain {}",
            profile.title,
            domain_info.major_domain,
            domain_info.domain_search
        );

        self.reset_stores().await?;

        let seed_queries = build_seed_queries(&domain_info);
        let records = self.orchestrator.run(&seed_queries).await?;

        // One record per request keeps each scoring call inside the token
        // budget; a failed batch just contributes no scores.
        for (index, record) in records.iter().enumerate() {
            log::info!(
                "Scoring company {}/{}: {}",
                index + 1,
                records.len(),
                record.company_name
            );
            self.scoring
                .score(&profile, std::slice::from_ref(record))
                .await;
        }

        let ranked = self.reconciler.reconcile().await?;

        Ok(AnalysisSummary {
            competitor_count: ranked.len(),
        })
    }

    async fn reset_stores(&self) -> anyhow::Result<()> {
        for path in [&self.raw_output_path, &self.scoring_store_path] {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create artifact directory")?;
            }
        }

        tokio::fs::write(&self.raw_output_path, "[]")
            .await
            .context("Failed to reset raw output artifact")?;
        tokio::fs::write(&self.scoring_store_path, "")
            .await
            .context("Failed to reset scoring store")
    }
}

/// The four listing-site probes the scrape starts from.
pub fn build_seed_queries(domain_info: &DomainInfo) -> Vec<String> {
    vec![
        format!("{} startups f6s india", domain_info.domain_search),
        format!("top {} companies tracxn india", domain_info.major_domain),
        format!("top {} companies tracxn india", domain_info.domain_search),
        format!("top {} startups f6s india", domain_info.major_domain),
    ]
}
