pub mod detail_scraper;
pub mod domain_classifier;
pub mod droid;
pub mod name_extractor;
pub mod orchestrator;
pub mod page_fetcher;
pub mod pipeline;
pub mod reconciler;
pub mod scoring;
pub mod search;

pub use detail_scraper::*;
pub use domain_classifier::*;
pub use droid::*;
pub use name_extractor::*;
pub use orchestrator::*;
pub use page_fetcher::*;
pub use pipeline::*;
pub use reconciler::*;
pub use scoring::*;
pub use search::*;
