use super::http_client::{PoliteDelay, build_client, random_user_agent};
use super::parsers::parse_listing_page;
use super::urls::SearchUrlBuilder;
use super::{FetchError, FetchStrategy};
use crate::config::DirectConfig;
use crate::models::RawListing;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Plain HTTP against the listings site, dressed up as a desktop browser.
///
/// A fresh client (user agent, cookie jar, optional proxy) is built per run.
/// 403 and 429 abort the strategy immediately; other failures only skip
/// the page.
pub struct DirectFetch {
    urls: SearchUrlBuilder,
    proxies: Vec<String>,
    timeout: Duration,
    delay: PoliteDelay,
    min_body_bytes: usize,
}

impl DirectFetch {
    pub fn new(cfg: &DirectConfig, urls: SearchUrlBuilder) -> Self {
        Self {
            urls,
            proxies: cfg.proxies.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            delay: PoliteDelay {
                base_ms: cfg.base_delay_ms,
                jitter_min_ms: cfg.jitter_min_ms,
                jitter_max_ms: cfg.jitter_max_ms,
                page_step_ms: cfg.page_step_ms,
            },
            min_body_bytes: cfg.min_body_bytes,
        }
    }

    fn session(&self) -> Result<reqwest::Client, FetchError> {
        let user_agent = random_user_agent();
        let proxy = self.proxies.choose(&mut rand::thread_rng());

        if let Some(proxy) = proxy {
            match build_client(self.timeout, user_agent, Some(proxy)) {
                Ok(client) => {
                    debug!("Direct session through proxy {}", proxy);
                    return Ok(client);
                }
                Err(e) => warn!("Skipping proxy: {:#}", e),
            }
        }

        build_client(self.timeout, user_agent, None).map_err(|e| FetchError::Unavailable {
            strategy: "direct",
            reason: format!("{:#}", e),
        })
    }
}

#[async_trait]
impl FetchStrategy for DirectFetch {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn fetch(&self, country: &str, max_pages: u32) -> Result<Vec<RawListing>, FetchError> {
        let client = self.session()?;
        let base = self.urls.site_base(country);
        let mut scanned = 0u32;
        let mut last_error = None;

        for page in 0..max_pages {
            let url = self.urls.search_url(country, page);
            self.delay.wait(page).await;
            info!(country, page, "GET {}", url);

            let response = match client.get(&url).send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(country, page, "Request failed: {}", e);
                    last_error = Some(FetchError::Transient {
                        url,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                warn!(country, page, "Blocked with HTTP {}", status.as_u16());
                return Err(FetchError::Blocked {
                    status: status.as_u16(),
                    url,
                });
            }
            if status != StatusCode::OK {
                warn!(country, page, "Unexpected HTTP {}", status.as_u16());
                last_error = Some(FetchError::Status {
                    status: status.as_u16(),
                    url,
                });
                continue;
            }

            let body = match response.text().await {
                Ok(b) => b,
                Err(e) => {
                    warn!(country, page, "Body unreadable: {}", e);
                    last_error = Some(FetchError::Transient {
                        url,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if body.len() < self.min_body_bytes {
                warn!(country, page, "Suspiciously short page ({} bytes), skipping", body.len());
                continue;
            }

            scanned += 1;
            let listings = parse_listing_page(&body, &base);
            if listings.is_empty() {
                debug!(country, page, "No job cards on page");
                continue;
            }

            info!(country, page, "Direct page yielded {} listings", listings.len());
            return Ok(listings);
        }

        Err(FetchError::nothing_found(scanned, last_error))
    }
}
