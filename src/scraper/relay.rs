use super::http_client::{PoliteDelay, build_client, random_user_agent};
use super::parsers::parse_listing_page;
use super::urls::SearchUrlBuilder;
use super::{FetchError, FetchStrategy};
use crate::config::RelayConfig;
use crate::models::RawListing;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};
use url::Url;

/// Fetches result pages through a third-party rendering relay
/// (`{endpoint}?api_key=…&url=…`). Only transport errors are retried;
/// a non-200 answer from the relay moves on to the next page.
pub struct RelayFetch {
    client: reqwest::Client,
    token: String,
    endpoint: String,
    urls: SearchUrlBuilder,
    delay: PoliteDelay,
    max_retries: usize,
}

impl RelayFetch {
    pub fn new(cfg: &RelayConfig, token: &str, urls: SearchUrlBuilder) -> Result<Self> {
        let client = build_client(
            Duration::from_secs(cfg.timeout_secs),
            random_user_agent(),
            None,
        )?;
        Ok(Self {
            client,
            token: token.to_string(),
            endpoint: cfg.endpoint.clone(),
            urls,
            delay: PoliteDelay {
                base_ms: cfg.base_delay_ms,
                jitter_min_ms: cfg.jitter_min_ms,
                jitter_max_ms: cfg.jitter_max_ms,
                page_step_ms: 0,
            },
            max_retries: cfg.max_retries,
        })
    }

    fn relay_url(&self, target: &str) -> Result<Url, FetchError> {
        Url::parse_with_params(
            &self.endpoint,
            &[("api_key", self.token.as_str()), ("url", target)],
        )
        .map_err(|e| FetchError::Unavailable {
            strategy: "relay",
            reason: format!("bad endpoint {}: {}", self.endpoint, e),
        })
    }

    async fn get_page(&self, relay_url: &Url) -> Result<reqwest::Response, reqwest::Error> {
        Retry::spawn(retry_delays(self.max_retries), || {
            self.client.get(relay_url.clone()).send()
        })
        .await
    }
}

/// Pauses between relay retries: 500ms, 1s, 2s, 4s, then 5s, each jittered.
fn retry_delays(max_retries: usize) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(250)
        .max_delay(Duration::from_secs(5))
        .map(jitter)
        .take(max_retries)
}

#[async_trait]
impl FetchStrategy for RelayFetch {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn fetch(&self, country: &str, max_pages: u32) -> Result<Vec<RawListing>, FetchError> {
        let base = self.urls.site_base(country);
        let mut scanned = 0u32;
        let mut last_error = None;

        for page in 0..max_pages {
            let target = self.urls.search_url(country, page);
            let relay_url = self.relay_url(&target)?;
            info!(country, page, "Relay request for {}", target);

            self.delay.wait(page).await;

            let response = match self.get_page(&relay_url).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(country, page, "Relay transport error: {}", e);
                    last_error = Some(FetchError::Transient {
                        url: target,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let status = response.status();
            if status != StatusCode::OK {
                warn!(country, page, "Relay answered HTTP {}", status.as_u16());
                last_error = Some(FetchError::Status {
                    status: status.as_u16(),
                    url: target,
                });
                continue;
            }

            let body = match response.text().await {
                Ok(b) => b,
                Err(e) => {
                    warn!(country, page, "Relay body unreadable: {}", e);
                    last_error = Some(FetchError::Transient {
                        url: target,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            scanned += 1;
            let listings = parse_listing_page(&body, &base);
            if !listings.is_empty() {
                info!(country, page, "Relay page yielded {} listings", listings.len());
                return Ok(listings);
            }
            debug!(country, page, "Relay page had no job cards");
        }

        Err(FetchError::nothing_found(scanned, last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CARDS: &str = r#"<html><body>
        <div class="job_seen_beacon"><h2><a href="/rc/clk?jk=r1">Stage Finance</a></h2>
        <span class="companyName">Relay Co</span><div class="companyLocation">Tanger</div></div>
    </body></html>"#;

    fn relay_config(server: &MockServer) -> RelayConfig {
        RelayConfig {
            token: Some("secret".into()),
            endpoint: server.uri(),
            timeout_secs: 5,
            base_delay_ms: 0,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
            max_retries: 0,
        }
    }

    fn relay_for(server: &MockServer) -> RelayFetch {
        RelayFetch::new(&relay_config(server), "secret", SearchUrlBuilder::default()).unwrap()
    }

    #[test]
    fn test_retry_delays_stay_short() {
        let delays: Vec<Duration> = retry_delays(8).collect();
        assert_eq!(delays.len(), 8);
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(5)));
        assert_eq!(retry_delays(0).count(), 0);
    }

    #[tokio::test]
    async fn test_relay_retries_after_a_timed_out_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(CARDS)
                    .set_delay(Duration::from_secs(3)),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CARDS))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = RelayConfig {
            timeout_secs: 1,
            max_retries: 2,
            ..relay_config(&server)
        };
        let relay = RelayFetch::new(&cfg, "secret", SearchUrlBuilder::default()).unwrap();

        let listings = relay.fetch("Maroc", 1).await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].link, "https://ma.indeed.com/rc/clk?jk=r1");
    }

    #[tokio::test]
    async fn test_relay_passes_token_and_target() {
        let server = MockServer::start().await;
        let target = SearchUrlBuilder::default().search_url("Maroc", 0);
        Mock::given(method("GET"))
            .and(query_param("api_key", "secret"))
            .and(query_param("url", target.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(CARDS))
            .expect(1)
            .mount(&server)
            .await;

        let listings = relay_for(&server).fetch("Maroc", 1).await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].link, "https://ma.indeed.com/rc/clk?jk=r1");
        assert_eq!(listings[0].location, "Tanger");
    }

    #[tokio::test]
    async fn test_relay_non_200_moves_to_next_page() {
        let server = MockServer::start().await;
        let urls = SearchUrlBuilder::default();
        Mock::given(method("GET"))
            .and(query_param("url", urls.search_url("France", 0).as_str()))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("url", urls.search_url("France", 1).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(CARDS))
            .expect(1)
            .mount(&server)
            .await;

        let listings = relay_for(&server).fetch("France", 3).await.unwrap();
        assert_eq!(listings[0].link, "https://fr.indeed.com/rc/clk?jk=r1");
    }

    #[tokio::test]
    async fn test_relay_reports_status_when_every_page_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(2)
            .mount(&server)
            .await;

        let err = relay_for(&server).fetch("Canada", 2).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 403, .. }));
    }
}
