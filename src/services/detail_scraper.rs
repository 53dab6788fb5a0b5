use std::time::Duration;

use rand::Rng;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Map, Value};

use crate::configuration::ScraperSettings;
use crate::domain::competitor::DetailRecord;

use super::{BrowserFetcher, CookieFetcher, PageFetcher, ProxyFetcher};

/// Scrapes one company profile page into a `DetailRecord` through three
/// tiers: proxy fetch, cookie-jar fetch, then a single headless-browser
/// attempt. The HTTP tiers share a retry budget; the browser tier runs at
/// most once. All tiers feed the same field extraction, and a page that
/// fetched fine but matched no selectors still yields a record.
pub struct DetailScraper {
    proxy: Box<dyn PageFetcher>,
    cookie: Box<dyn PageFetcher>,
    browser: Box<dyn PageFetcher>,
    http_retries: u8,
}

impl DetailScraper {
    pub fn new(settings: &ScraperSettings, scraperapi_key: String) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.request_timeout_secs);

        Ok(DetailScraper {
            proxy: Box::new(ProxyFetcher::new(scraperapi_key, timeout)?),
            cookie: Box::new(CookieFetcher::new(timeout)?),
            browser: Box::new(BrowserFetcher::new(
                settings.webdriver_url.clone(),
                Duration::from_secs(settings.page_settle_secs),
            )),
            http_retries: settings.fetch_retries,
        })
    }

    pub fn from_fetchers(
        proxy: Box<dyn PageFetcher>,
        cookie: Box<dyn PageFetcher>,
        browser: Box<dyn PageFetcher>,
        http_retries: u8,
    ) -> Self {
        DetailScraper {
            proxy,
            cookie,
            browser,
            http_retries,
        }
    }

    pub async fn scrape(&self, company_name: &str, url: &str) -> Option<DetailRecord> {
        for attempt in 1..=self.http_retries {
            for fetcher in [&self.proxy, &self.cookie] {
                match fetcher.fetch(url).await {
                    Ok(html) => return Some(build_record(company_name, url, &html)),
                    Err(e) => log::warn!(
                        "{} fetch attempt {} failed for {}: {:?}",
                        fetcher.label(),
                        attempt,
                        url,
                        e
                    ),
                }
            }

            if attempt < self.http_retries {
                // Jittered pause between retry rounds.
                let pause = Duration::from_millis(rand::thread_rng().gen_range(300..800));
                tokio::time::sleep(pause).await;
            }
        }

        // Last resort, exactly once per company.
        match self.browser.fetch(url).await {
            Ok(html) => Some(build_record(company_name, url, &html)),
            Err(e) => {
                log::error!("Browser fetch failed for {}: {:?}", url, e);
                None
            }
        }
    }
}

fn build_record(company_name: &str, url: &str, page_html: &str) -> DetailRecord {
    DetailRecord {
        company_name: company_name.to_string(),
        searched_url: url.to_string(),
        details: extract_company_details(page_html),
    }
}

fn element_text(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Pulls the structured fields off a rendered profile page. Every block is
/// independently optional; a missing block is simply absent from the map.
/// The social/industry/vertical keys are always present so downstream
/// emptiness checks see a consistent shape.
pub fn extract_company_details(page_html: &str) -> Map<String, Value> {
    let quick_fact_selector = Selector::parse(
        r#"div[role="list"][aria-label="Quick Facts"] div[data-pp-overview-item]"#,
    )
    .unwrap();
    let fact_label_selector = Selector::parse("li.dont-break.text-small").unwrap();
    let fact_value_selector = Selector::parse("span.pp-overview-item__title").unwrap();
    let description_selector =
        Selector::parse("div[data-general-info-description] p.pp-description_text").unwrap();
    let contact_item_selector =
        Selector::parse("div.pp-contact-info div.pp-contact-info_item").unwrap();
    let contact_label_selector = Selector::parse("h5, div.font-weight-bold").unwrap();
    let contact_value_selector = Selector::parse("a, div.font-weight-normal").unwrap();
    let address_line_selector =
        Selector::parse("div.pp-contact-info_corporate-office ul.list-type-none li").unwrap();
    let social_link_selector = Selector::parse("div.info-item__social a").unwrap();
    let industry_value_selector = Selector::parse("div.font-weight-normal").unwrap();
    let vertical_selector = Selector::parse("div.pp-contact-info_item a.font-underline").unwrap();
    let faq_selector = Selector::parse("ul.pp-faqs-table li").unwrap();
    let h3_selector = Selector::parse("h3").unwrap();
    let p_selector = Selector::parse("p").unwrap();

    let html_document = Html::parse_document(page_html);
    let mut details = Map::new();

    for fact in html_document.select(&quick_fact_selector) {
        let label = fact.select(&fact_label_selector).next();
        let value = fact.select(&fact_value_selector).next();
        if let (Some(label), Some(value)) = (label, value) {
            details.insert(element_text(label), json!(element_text(value)));
        }
    }

    if let Some(description) = html_document.select(&description_selector).next() {
        details.insert("Description".to_string(), json!(element_text(description)));
    }

    let mut industries: Vec<String> = vec![];
    for item in html_document.select(&contact_item_selector) {
        let label = item.select(&contact_label_selector).next();
        let value = item.select(&contact_value_selector).next();
        if let (Some(label), Some(value)) = (label, value) {
            let label_text = element_text(label);
            if label_text.contains("Industr") {
                industries.extend(
                    item.select(&industry_value_selector)
                        .map(element_text)
                        .filter(|text| !text.is_empty()),
                );
            }
            details.insert(label_text, json!(element_text(value)));
        }
    }

    let address_lines: Vec<String> = html_document
        .select(&address_line_selector)
        .map(element_text)
        .collect();
    if !address_lines.is_empty() {
        details.insert("Address".to_string(), json!(address_lines));
    }

    let mut social_links = Map::new();
    for link in html_document.select(&social_link_selector) {
        let platform = link.value().attr("aria-label").map(|label| {
            label
                .strip_suffix(" link")
                .unwrap_or(label)
                .to_string()
        });
        if let (Some(platform), Some(href)) = (platform, link.value().attr("href")) {
            social_links.insert(platform, json!(href));
        }
    }
    details.insert("Social Media".to_string(), Value::Object(social_links));

    details.insert("Industries".to_string(), json!(industries));

    let verticals: Vec<String> = html_document
        .select(&vertical_selector)
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect();
    details.insert("Verticals".to_string(), json!(verticals));

    for faq in html_document.select(&faq_selector) {
        let question = faq.select(&h3_selector).next();
        let answer = faq.select(&p_selector).next();
        if let (Some(question), Some(answer)) = (question, answer) {
            details.insert(element_text(question), json!(element_text(answer)));
        }
    }

    details
}
