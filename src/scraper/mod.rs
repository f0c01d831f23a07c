pub mod browser;
#[cfg(feature = "browser")]
pub mod chromium;
pub mod cleaner;
pub mod direct;
pub mod http_client;
pub mod parsers;
pub mod relay;
pub mod urls;

use crate::config::AppConfig;
use crate::models::RawListing;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use self::browser::BrowserFetch;
use self::direct::DirectFetch;
use self::relay::RelayFetch;
use self::urls::SearchUrlBuilder;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FetchError {
    /// The target refused us (rate limit / anti-bot). Ends the current strategy.
    #[error("blocked with HTTP {status} at {url}")]
    Blocked { status: u16, url: String },

    /// Network or timeout failure on a single page.
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("unexpected HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Pages were fetched but none contained a usable job card.
    #[error("{pages} page(s) fetched without any job card")]
    ExtractionEmpty { pages: u32 },

    #[error("{strategy} strategy unavailable: {reason}")]
    Unavailable {
        strategy: &'static str,
        reason: String,
    },

    #[error("all {attempted} fetch strategies came back empty")]
    Exhausted { attempted: usize },
}

impl FetchError {
    /// Outcome of a strategy that ran out of pages without a single listing.
    pub(crate) fn nothing_found(pages_scanned: u32, last: Option<FetchError>) -> FetchError {
        match last {
            Some(err) if pages_scanned == 0 => err,
            _ => FetchError::ExtractionEmpty {
                pages: pages_scanned,
            },
        }
    }
}

// ── Strategy trait ────────────────────────────────────────────────────────────

/// One interchangeable way of getting result pages off the listings site.
///
/// Implementations stop at the first page that yields listings and return
/// what they have; they return an error (or an empty vec) when nothing usable
/// came back within `max_pages`.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, country: &str, max_pages: u32) -> Result<Vec<RawListing>, FetchError>;
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// Ordered fallback over fetch strategies.
pub struct StrategyChain {
    strategies: Vec<Box<dyn FetchStrategy>>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Box<dyn FetchStrategy>>) -> Self {
        Self { strategies }
    }

    /// Relay (if a token is configured) → direct → headless browser (if enabled).
    pub fn from_config(config: &AppConfig) -> Self {
        let urls = SearchUrlBuilder::new(&config.site);
        let mut strategies: Vec<Box<dyn FetchStrategy>> = Vec::new();

        if let Some(token) = &config.relay.token {
            match RelayFetch::new(&config.relay, token, urls.clone()) {
                Ok(relay) => strategies.push(Box::new(relay)),
                Err(e) => warn!("Relay strategy disabled: {:#}", e),
            }
        }

        strategies.push(Box::new(DirectFetch::new(&config.direct, urls.clone())));

        if config.browser.enabled {
            if let Some(browser) = BrowserFetch::from_config(&config.browser, urls) {
                strategies.push(Box::new(browser));
            }
        }

        Self::new(strategies)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn fetch(
        &self,
        country: &str,
        max_pages: u32,
    ) -> Result<Vec<RawListing>, FetchError> {
        let mut attempted = 0usize;

        for strategy in &self.strategies {
            attempted += 1;
            let name = strategy.name();
            info!(strategy = name, country, max_pages, "Trying fetch strategy");

            match strategy.fetch(country, max_pages).await {
                Ok(listings) if !listings.is_empty() => {
                    info!(strategy = name, country, "Success: {} listings", listings.len());
                    return Ok(listings);
                }
                Ok(_) => info!(strategy = name, country, "Strategy returned no listings"),
                Err(e @ FetchError::Blocked { .. }) => {
                    warn!(strategy = name, country, "Strategy blocked: {}", e)
                }
                Err(e) => warn!(strategy = name, country, "Strategy failed: {}", e),
            }
        }

        warn!(country, "All fetch strategies failed");
        Err(FetchError::Exhausted { attempted })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub enum Scripted {
        Listings(Vec<RawListing>),
        Blocked,
        Empty,
    }

    /// Strategy returning a fixed outcome and counting invocations.
    pub struct ScriptedStrategy {
        pub name: &'static str,
        pub outcome: Scripted,
        pub calls: Arc<AtomicUsize>,
    }

    impl ScriptedStrategy {
        pub fn new(name: &'static str, outcome: Scripted) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let s = Self {
                name,
                outcome,
                calls: Arc::clone(&calls),
            };
            (s, calls)
        }
    }

    #[async_trait]
    impl FetchStrategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, _country: &str, _max_pages: u32) -> Result<Vec<RawListing>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Scripted::Listings(l) => Ok(l.clone()),
                Scripted::Blocked => Err(FetchError::Blocked {
                    status: 429,
                    url: "https://ma.indeed.com/jobs".into(),
                }),
                Scripted::Empty => Ok(Vec::new()),
            }
        }
    }

    pub fn listings(n: usize) -> Vec<RawListing> {
        (0..n)
            .map(|i| RawListing {
                title: format!("Stage {i}"),
                company: "Acme".into(),
                location: "Rabat".into(),
                date_posted: "il y a 1 jour".into(),
                link: format!("https://ma.indeed.com/viewjob?jk={i}"),
            })
            .collect()
    }
}
