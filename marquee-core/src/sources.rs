//! Default scraping runners.
//!
//! `SourceScraper` is the pool's repeatable job: collect streaming-source
//! links for one title across the configured upstream hosts. `SourceProbe`
//! is the one-off variant: check a single host for reachability. Both go
//! through the deadline-bounded fetch helpers; site-specific selector logic
//! stays out of the core, so extraction here is a plain URL pattern.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::config::{FetchPolicy, UpstreamConfig};
use crate::fetch::{fetch_with_timeout, retry_fetch};
use crate::job::JobRunner;

const EMBED_URL_PATTERN: &str = r#"https?://[^\s"'<>\\]+(?:embed|player|stream)[^\s"'<>\\]*"#;

#[derive(Debug, Deserialize)]
struct SourceRequest {
    tmdb_id: u64,
}

#[derive(Debug, Serialize)]
struct StreamSource {
    host: String,
    url: String,
}

/// Scrapes streaming-source links for a title from every configured host.
///
/// Hosts that stay unreachable after retries are skipped; the job fails only
/// when every host errored.
pub struct SourceScraper {
    client: Client,
    policy: FetchPolicy,
    hosts: Vec<String>,
    pattern: Regex,
}

impl fmt::Debug for SourceScraper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceScraper")
            .field("hosts", &self.hosts)
            .field("policy", &self.policy)
            .finish()
    }
}

impl SourceScraper {
    pub fn new(client: Client, policy: FetchPolicy, upstreams: &UpstreamConfig) -> Self {
        Self {
            client,
            policy,
            hosts: upstreams.hosts.clone(),
            pattern: Regex::new(EMBED_URL_PATTERN).expect("embed pattern is valid"),
        }
    }

    async fn scrape_host(&self, template: &str, tmdb_id: u64) -> anyhow::Result<Vec<StreamSource>> {
        let raw = template.replace("{tmdb_id}", &tmdb_id.to_string());
        let url: Url = raw
            .parse()
            .with_context(|| format!("bad upstream template '{template}'"))?;

        let response = retry_fetch(&self.client, &url, &self.policy).await?;
        let body = response.text().await?;

        let host = url.host_str().unwrap_or("").to_string();
        Ok(self
            .pattern
            .find_iter(&body)
            .map(|link| StreamSource {
                host: host.clone(),
                url: link.as_str().to_string(),
            })
            .collect())
    }
}

#[async_trait]
impl JobRunner for SourceScraper {
    async fn run(&self, payload: Value) -> anyhow::Result<Value> {
        let request: SourceRequest =
            serde_json::from_value(payload).context("invalid stream-sources payload")?;

        let scrapes = self
            .hosts
            .iter()
            .map(|template| self.scrape_host(template, request.tmdb_id));
        let outcomes = join_all(scrapes).await;

        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        let mut reachable = 0usize;
        let mut last_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(found) => {
                    reachable += 1;
                    for source in found {
                        if seen.insert(source.url.clone()) {
                            sources.push(source);
                        }
                    }
                }
                Err(error) => {
                    debug!(tmdb_id = request.tmdb_id, error = %error, "upstream host skipped");
                    last_error = Some(error);
                }
            }
        }

        if reachable == 0 {
            if let Some(error) = last_error {
                anyhow::bail!("every upstream host failed, last error: {error:#}");
            }
            anyhow::bail!("no upstream hosts configured");
        }

        info!(
            tmdb_id = request.tmdb_id,
            found = sources.len(),
            reachable,
            hosts = self.hosts.len(),
            "stream source scrape finished"
        );
        Ok(serde_json::json!({
            "tmdb_id": request.tmdb_id,
            "sources": sources,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeRequest {
    url: String,
}

/// Checks a single upstream for reachability within one bounded attempt.
///
/// An unreachable host is a probe *answer*, not a job failure; only a
/// malformed payload fails the job.
pub struct SourceProbe {
    client: Client,
    timeout: Duration,
}

impl fmt::Debug for SourceProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceProbe")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SourceProbe {
    pub fn new(client: Client, policy: FetchPolicy) -> Self {
        Self {
            client,
            timeout: policy.timeout(),
        }
    }
}

#[async_trait]
impl JobRunner for SourceProbe {
    async fn run(&self, payload: Value) -> anyhow::Result<Value> {
        let request: ProbeRequest =
            serde_json::from_value(payload).context("invalid probe payload")?;
        let url: Url = request
            .url
            .parse()
            .with_context(|| format!("invalid probe url '{}'", request.url))?;

        let result = fetch_with_timeout(&self.client, &url, self.timeout).await;
        let reply = match result {
            Ok(response) => serde_json::json!({
                "url": request.url,
                "reachable": response.status().is_success(),
                "status": response.status().as_u16(),
            }),
            Err(error) => serde_json::json!({
                "url": request.url,
                "reachable": false,
                "error": error.to_string(),
            }),
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_page(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
        format!("http://{addr}")
    }

    fn fast_policy() -> FetchPolicy {
        FetchPolicy {
            timeout_ms: 2_000,
            max_retries: 0,
            backoff_unit_ms: 10,
        }
    }

    #[tokio::test]
    async fn extracts_embed_links_from_reachable_hosts() {
        let page = "<html><iframe src=\"https://cdn.example/embed/42?x=1\"></iframe>\
                    <a href=\"https://cdn.example/player/42\">watch</a></html>";
        let base = serve_page(page).await;

        let upstreams = UpstreamConfig {
            hosts: vec![format!("{base}/movie/{{tmdb_id}}")],
        };
        let scraper = SourceScraper::new(
            Client::new(),
            fast_policy(),
            &upstreams,
        );

        let reply = scraper
            .run(json!({"tmdb_id": 42}))
            .await
            .expect("scrape succeeds");
        let sources = reply["sources"].as_array().expect("sources array");
        assert_eq!(sources.len(), 2);
        assert_eq!(reply["tmdb_id"], 42);
    }

    #[tokio::test]
    async fn fails_only_when_every_host_is_down() {
        let upstreams = UpstreamConfig {
            // Nothing listens here.
            hosts: vec!["http://127.0.0.1:1/movie/{tmdb_id}".to_string()],
        };
        let scraper = SourceScraper::new(Client::new(), fast_policy(), &upstreams);

        let error = scraper
            .run(json!({"tmdb_id": 7}))
            .await
            .expect_err("all hosts down");
        assert!(error.to_string().contains("every upstream host failed"));
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let scraper = SourceScraper::new(
            Client::new(),
            fast_policy(),
            &UpstreamConfig::default(),
        );
        let error = scraper
            .run(json!({"movie": "not-an-id"}))
            .await
            .expect_err("payload schema mismatch");
        assert!(error.to_string().contains("invalid stream-sources payload"));
    }

    #[tokio::test]
    async fn probe_reports_unreachable_hosts_instead_of_failing() {
        let probe = SourceProbe::new(Client::new(), fast_policy());
        let reply = probe
            .run(json!({"url": "http://127.0.0.1:1/"}))
            .await
            .expect("probe settles with an answer");
        assert_eq!(reply["reachable"], false);
    }
}
