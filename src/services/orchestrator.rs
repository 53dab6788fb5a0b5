use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::configuration::ScraperSettings;
use crate::domain::competitor::DetailRecord;

use super::{
    extract_candidate_names, CookieFetcher, CredentialPool, DetailScraper, PageFetcher,
    ProxyFetcher, SearchOutcome, SearchResolver,
};

/// Query suffix that steers the per-company search toward the profile site
/// the detail scraper knows how to parse.
const PROFILE_QUERY_SUFFIX: &str = "pitchbook";

/// Drives the whole scrape: seed queries -> listing pages -> candidate
/// names -> per-company detail records, fanned out over a bounded worker
/// pool. Owns the raw-output artifact's write path exclusively.
pub struct ScrapeOrchestrator {
    resolver: Arc<SearchResolver>,
    scraper: Arc<DetailScraper>,
    credentials: Arc<CredentialPool>,
    listing_fetcher: Box<dyn PageFetcher>,
    listing_fallback: Box<dyn PageFetcher>,
    worker_count: usize,
    max_candidates: usize,
    raw_output_path: PathBuf,
}

impl ScrapeOrchestrator {
    pub fn new(
        resolver: Arc<SearchResolver>,
        scraper: Arc<DetailScraper>,
        credentials: Arc<CredentialPool>,
        settings: &ScraperSettings,
        scraperapi_key: String,
        raw_output_path: PathBuf,
    ) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.request_timeout_secs);

        Ok(ScrapeOrchestrator {
            resolver,
            scraper,
            credentials,
            listing_fetcher: Box::new(ProxyFetcher::new(scraperapi_key, timeout)?),
            listing_fallback: Box::new(CookieFetcher::new(timeout)?),
            worker_count: settings.worker_count,
            max_candidates: settings.max_candidates,
            raw_output_path,
        })
    }

    /// Runs one full scrape. Individual candidate failures are logged and
    /// skipped; the only abort condition is no seed query resolving at all.
    pub async fn run(&self, seed_queries: &[String]) -> anyhow::Result<Vec<DetailRecord>> {
        let candidates = self.collect_candidate_names(seed_queries).await?;
        log::info!("Scraping details for {} candidate companies", candidates.len());

        let records = self.scrape_candidates(candidates).await;

        persist_raw_records(&records, &self.raw_output_path).await?;
        log::info!("Persisted {} raw detail records", records.len());

        Ok(records)
    }

    async fn collect_candidate_names(
        &self,
        seed_queries: &[String],
    ) -> anyhow::Result<Vec<String>> {
        let mut candidates: Vec<String> = vec![];
        let mut resolved_any = false;

        for query in seed_queries {
            let credential = self.credentials.next();
            match self.resolver.resolve(query, &credential).await {
                SearchOutcome::Found(listing_url) => {
                    resolved_any = true;
                    match self.fetch_listing(&listing_url).await {
                        Some(html) => {
                            let names = extract_candidate_names(&html);
                            log::info!(
                                "Found {} candidate names on {}",
                                names.len(),
                                listing_url
                            );
                            merge_candidate_names(&mut candidates, names, self.max_candidates);
                        }
                        None => log::warn!("Could not fetch listing page {}", listing_url),
                    }
                }
                SearchOutcome::NotFound => {
                    log::warn!("No listing found for seed query: {}", query)
                }
            }
        }

        anyhow::ensure!(resolved_any, "failed to resolve any seed query");

        Ok(candidates)
    }

    async fn fetch_listing(&self, url: &str) -> Option<String> {
        match self.listing_fetcher.fetch(url).await {
            Ok(html) => Some(html),
            Err(e) => {
                log::warn!("Proxy listing fetch failed for {}: {:?}", url, e);
                match self.listing_fallback.fetch(url).await {
                    Ok(html) => Some(html),
                    Err(e) => {
                        log::error!("Fallback listing fetch failed for {}: {:?}", url, e);
                        None
                    }
                }
            }
        }
    }

    /// Fans detail scraping out across the worker pool. Results arrive in
    /// completion order; downstream ordering is imposed at reconciliation.
    async fn scrape_candidates(&self, candidates: Vec<String>) -> Vec<DetailRecord> {
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut workers = JoinSet::new();

        for name in candidates {
            let resolver = self.resolver.clone();
            let scraper = self.scraper.clone();
            let credential = self.credentials.next();
            let semaphore = semaphore.clone();

            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };

                let query = format!("{} {}", name, PROFILE_QUERY_SUFFIX);
                match resolver.resolve(&query, &credential).await {
                    SearchOutcome::Found(url) => scraper.scrape(&name, &url).await,
                    SearchOutcome::NotFound => {
                        log::warn!("No profile url found for {}", name);
                        None
                    }
                }
            });
        }

        let mut records: Vec<DetailRecord> = vec![];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => log::error!("Scrape worker failed: {:?}", e),
            }
        }

        records
    }
}

/// Case-insensitive, substring-aware merge preserving first-seen order.
/// "Acme" and "Acme Inc" are the same company coming from two listings.
fn merge_candidate_names(merged: &mut Vec<String>, new_names: Vec<String>, cap: usize) {
    for name in new_names {
        if merged.len() >= cap {
            return;
        }
        let key = name.to_lowercase();
        let duplicate = merged.iter().any(|existing| {
            let existing = existing.to_lowercase();
            existing.contains(&key) || key.contains(&existing)
        });
        if !duplicate {
            merged.push(name);
        }
    }
}

/// Overwrites the raw artifact wholesale; a fresh run replaces prior output.
pub async fn persist_raw_records(records: &[DetailRecord], path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create raw output directory")?;
    }

    let body =
        serde_json::to_string_pretty(records).context("Failed to serialize raw records")?;
    tokio::fs::write(path, body)
        .await
        .context("Failed to write raw output artifact")
}
