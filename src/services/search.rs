use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::configuration::{GoogleCredential, SearchSettings};

const GOOGLE_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";
const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

/// Outcome of resolving one free-text query to a url. Absence is a normal
/// result here; the caller decides whether to skip or abort.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Found(String),
    NotFound,
}

/// Immutable set of Google credential pairs handed out round-robin so that
/// parallel workers spread volume across quota-limited accounts.
pub struct CredentialPool {
    credentials: Vec<GoogleCredential>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    pub fn new(credentials: Vec<GoogleCredential>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !credentials.is_empty(),
            "at least one google credential pair is required"
        );
        Ok(CredentialPool {
            credentials,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn next(&self) -> GoogleCredential {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.credentials[index % self.credentials.len()].clone()
    }
}

#[derive(Serialize)]
struct GoogleQuery<'a> {
    q: &'a str,
    key: &'a str,
    cx: &'a str,
}

#[derive(Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    items: Vec<GoogleItem>,
}

#[derive(Deserialize)]
struct GoogleItem {
    link: String,
}

#[derive(Serialize)]
struct TavilyQuery<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    include_answer: bool,
    include_images: bool,
    max_results: u8,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    url: String,
}

/// Resolves a query to its first search hit. Primary provider is Google
/// Custom Search routed through the scraperapi proxy; on a 429 the same
/// query is retried once against Tavily, which draws on a separate quota.
pub struct SearchResolver {
    proxied_client: reqwest::Client,
    plain_client: reqwest::Client,
    tavily_api_key: String,
    google_search_url: String,
    tavily_search_url: String,
}

impl SearchResolver {
    pub fn new(settings: &SearchSettings, timeout: Duration) -> anyhow::Result<Self> {
        let proxy_url = format!(
            "http://scraperapi:{}@proxy-server.scraperapi.com:8001",
            settings.scraperapi_key
        );
        let proxied_client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::http(&proxy_url).context("Invalid http proxy url")?)
            .proxy(reqwest::Proxy::https(&proxy_url).context("Invalid https proxy url")?)
            .read_timeout(timeout)
            .build()
            .context("Failed to build proxied search client")?;
        let plain_client = reqwest::Client::builder()
            .read_timeout(timeout)
            .build()
            .context("Failed to build fallback search client")?;

        Ok(SearchResolver {
            proxied_client,
            plain_client,
            tavily_api_key: settings.tavily_api_key.clone(),
            google_search_url: GOOGLE_SEARCH_URL.to_string(),
            tavily_search_url: TAVILY_SEARCH_URL.to_string(),
        })
    }

    /// Unproxied resolver pointed at arbitrary endpoints.
    #[cfg(test)]
    fn with_endpoints(
        google_search_url: String,
        tavily_search_url: String,
        tavily_api_key: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .read_timeout(timeout)
            .build()
            .context("Failed to build search client")?;

        Ok(SearchResolver {
            proxied_client: client.clone(),
            plain_client: client,
            tavily_api_key,
            google_search_url,
            tavily_search_url,
        })
    }

    pub async fn resolve(&self, query: &str, credential: &GoogleCredential) -> SearchOutcome {
        let response = self
            .proxied_client
            .get(&self.google_search_url)
            .query(&GoogleQuery {
                q: query,
                key: &credential.api_key,
                cx: &credential.cse_id,
            })
            .send()
            .await;

        match response {
            Ok(res) if res.status() == StatusCode::TOO_MANY_REQUESTS => {
                log::warn!("Google search rate-limited, falling back to tavily: {}", query);
                self.resolve_with_tavily(query).await
            }
            Ok(res) if res.status().is_success() => match res.json::<GoogleResponse>().await {
                Ok(body) => match body.items.into_iter().next() {
                    Some(item) => SearchOutcome::Found(item.link),
                    None => {
                        log::error!("Google search returned no items for query: {}", query);
                        SearchOutcome::NotFound
                    }
                },
                Err(e) => {
                    log::error!("Failed to deserialize google search response: {:?}", e);
                    SearchOutcome::NotFound
                }
            },
            Ok(res) => {
                log::error!("Google search returned {} for query: {}", res.status(), query);
                SearchOutcome::NotFound
            }
            Err(e) => {
                log::error!("No response from google search: {:?}", e);
                SearchOutcome::NotFound
            }
        }
    }

    async fn resolve_with_tavily(&self, query: &str) -> SearchOutcome {
        let response = self
            .plain_client
            .post(&self.tavily_search_url)
            .json(&TavilyQuery {
                api_key: &self.tavily_api_key,
                query,
                search_depth: "basic",
                include_answer: false,
                include_images: false,
                max_results: 1,
            })
            .send()
            .await;

        match response {
            Ok(res) if res.status().is_success() => match res.json::<TavilyResponse>().await {
                Ok(body) => match body.results.into_iter().next() {
                    Some(result) => SearchOutcome::Found(result.url),
                    None => {
                        log::error!("Tavily returned no results for query: {}", query);
                        SearchOutcome::NotFound
                    }
                },
                Err(e) => {
                    log::error!("Failed to deserialize tavily response: {:?}", e);
                    SearchOutcome::NotFound
                }
            },
            Ok(res) => {
                log::error!("Tavily returned {} for query: {}", res.status(), query);
                SearchOutcome::NotFound
            }
            Err(e) => {
                log::error!("No response from tavily: {:?}", e);
                SearchOutcome::NotFound
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use crate::configuration::GoogleCredential;

    use super::{CredentialPool, SearchOutcome, SearchResolver};

    fn credential(n: u8) -> GoogleCredential {
        GoogleCredential {
            api_key: format!("api-{n}"),
            cse_id: format!("cse-{n}"),
        }
    }

    const RATE_LIMITED: &str =
        "HTTP/1.1 429 Too Many Requests\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

    fn ok_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }

    fn content_length(head: &str) -> usize {
        head.lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse().ok())
            .unwrap_or(0)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        match text.split_once("\r\n\r\n") {
            Some((head, body)) => body.len() >= content_length(head),
            None => false,
        }
    }

    /// Serves one canned response and hands the raw request text back.
    async fn spawn_http_stub(response: String) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let (request_tx, request_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = vec![];
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&raw) {
                    break;
                }
            }
            _ = request_tx.send(String::from_utf8_lossy(&raw).into_owned());
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        (address, request_rx)
    }

    fn resolver(google_url: String, tavily_url: String) -> SearchResolver {
        SearchResolver::with_endpoints(
            google_url,
            tavily_url,
            "tavily-key".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn rate_limited_google_falls_back_to_tavily_with_the_same_query() {
        let (google_url, _google_request) = spawn_http_stub(RATE_LIMITED.to_string()).await;
        let (tavily_url, tavily_request) = spawn_http_stub(ok_response(
            r#"{"results": [{"url": "https://tavily.example/hit"}]}"#,
        ))
        .await;

        let outcome = resolver(google_url, tavily_url)
            .resolve("fintech startups f6s india", &credential(1))
            .await;

        assert_eq!(
            outcome,
            SearchOutcome::Found("https://tavily.example/hit".to_string())
        );
        let request = tavily_request.await.unwrap();
        assert!(request.starts_with("POST"));
        assert!(request.contains(r#""query":"fintech startups f6s india""#));
    }

    #[tokio::test]
    async fn google_hit_returns_first_link_without_touching_tavily() {
        let (google_url, google_request) = spawn_http_stub(ok_response(
            r#"{"items": [{"link": "https://listing.example/top"}, {"link": "https://other.example"}]}"#,
        ))
        .await;
        let (tavily_url, mut tavily_request) = spawn_http_stub(ok_response("{}")).await;

        let outcome = resolver(google_url, tavily_url)
            .resolve("fintech startups", &credential(1))
            .await;

        assert_eq!(
            outcome,
            SearchOutcome::Found("https://listing.example/top".to_string())
        );
        let request = google_request.await.unwrap();
        assert!(request.contains("key=api-1"));
        assert!(request.contains("cx=cse-1"));
        assert!(tavily_request.try_recv().is_err());
    }

    #[test]
    fn credential_pool_rotates_round_robin() {
        let pool = CredentialPool::new(vec![credential(1), credential(2), credential(3)]).unwrap();

        assert_eq!(pool.next(), credential(1));
        assert_eq!(pool.next(), credential(2));
        assert_eq!(pool.next(), credential(3));
        assert_eq!(pool.next(), credential(1));
    }

    #[test]
    fn credential_pool_rejects_empty_list() {
        assert!(CredentialPool::new(vec![]).is_err());
    }
}
