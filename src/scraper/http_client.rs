use anyhow::{Context, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Desktop browser identities rotated across sessions.
pub const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Headers a real browser sends on a top-level navigation.
pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

/// Build a cookie-keeping client, optionally routed through an outbound proxy.
pub fn build_client(
    timeout: Duration,
    user_agent: &str,
    proxy: Option<&str>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .default_headers(browser_headers())
        .timeout(timeout)
        .gzip(true)
        // Accept cookies so session-based pages work
        .cookie_store(true);

    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .with_context(|| format!("Invalid proxy address {}", proxy))?;
        builder = builder.proxy(proxy);
    }

    builder.build().context("Failed to build HTTP client")
}

// ── Throttling ────────────────────────────────────────────────────────────────

/// Randomised pause before each request: base + jitter + step × page.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoliteDelay {
    pub base_ms: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub page_step_ms: u64,
}

impl PoliteDelay {
    pub fn for_page(&self, page: u32) -> Duration {
        let jitter = if self.jitter_max_ms > self.jitter_min_ms {
            rand::thread_rng().gen_range(self.jitter_min_ms..=self.jitter_max_ms)
        } else {
            self.jitter_min_ms
        };
        let step = self.page_step_ms.saturating_mul(u64::from(page));
        Duration::from_millis(self.base_ms.saturating_add(jitter).saturating_add(step))
    }

    pub async fn wait(&self, page: u32) {
        let total = self.for_page(page);
        if total.is_zero() {
            return;
        }
        debug!("Waiting {:.2?} before request", total);
        sleep(total).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_bounds_grow_with_page() {
        let delay = PoliteDelay {
            base_ms: 1_000,
            jitter_min_ms: 500,
            jitter_max_ms: 800,
            page_step_ms: 3_000,
        };
        for _ in 0..50 {
            let first = delay.for_page(0);
            assert!(first >= Duration::from_millis(1_500) && first <= Duration::from_millis(1_800));
            let third = delay.for_page(2);
            assert!(third >= Duration::from_millis(7_500) && third <= Duration::from_millis(7_800));
        }
    }

    #[test]
    fn test_degenerate_jitter_range() {
        let delay = PoliteDelay {
            base_ms: 10,
            jitter_min_ms: 5,
            jitter_max_ms: 0,
            page_step_ms: 0,
        };
        assert_eq!(delay.for_page(7), Duration::from_millis(15));
        assert!(PoliteDelay::default().for_page(3).is_zero());
    }

    #[test]
    fn test_user_agent_pool() {
        assert!(USER_AGENTS.contains(&random_user_agent()));
    }

    #[test]
    fn test_bad_proxy_is_rejected() {
        assert!(build_client(Duration::from_secs(1), USER_AGENTS[0], Some("http://[::1")).is_err());
        assert!(build_client(Duration::from_secs(1), USER_AGENTS[0], None).is_ok());
    }
}
