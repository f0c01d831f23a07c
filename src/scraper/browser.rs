use super::parsers::parse_listing_page;
use super::urls::SearchUrlBuilder;
use super::{FetchError, FetchStrategy};
use crate::config::{BrowserConfig, CutoffConfig};
use crate::models::RawListing;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

// ── Rendering seam ────────────────────────────────────────────────────────────

/// A live browser session able to render pages one at a time.
#[async_trait]
pub trait PageRenderer: Send {
    /// Navigate to `url` and return the rendered HTML once `marker` matches,
    /// or `None` if it never shows up within `wait`.
    async fn render(
        &mut self,
        url: &str,
        marker: &str,
        wait: Duration,
    ) -> anyhow::Result<Option<String>>;

    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> anyhow::Result<Box<dyn PageRenderer>>;
}

// ── Diminishing-returns cutoff ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVerdict {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy)]
struct Probe {
    remaining: u32,
    consecutive_empty: u32,
}

/// Decides when paging stops paying off. After `min_scanned_pages` pages
/// came back empty, at most `probe_pages` more are tried and paging stops
/// once `max_consecutive_empty` of them are empty in a row.
#[derive(Debug, Clone)]
pub struct PagingCutoff {
    cfg: CutoffConfig,
    scanned: u32,
    probe: Option<Probe>,
}

impl PagingCutoff {
    pub fn new(cfg: CutoffConfig) -> Self {
        Self {
            cfg,
            scanned: 0,
            probe: None,
        }
    }

    /// A page was loaded and parsed but held no listings.
    pub fn empty_page(&mut self) -> PageVerdict {
        if self.probe.is_some() {
            return self.probe_empty();
        }

        let already_scanned = self.scanned;
        self.scanned += 1;
        if already_scanned < self.cfg.min_scanned_pages {
            return PageVerdict::Continue;
        }

        if self.cfg.probe_pages == 0 {
            return PageVerdict::Stop;
        }
        self.probe = Some(Probe {
            remaining: self.cfg.probe_pages,
            consecutive_empty: 0,
        });
        PageVerdict::Continue
    }

    /// The page could not be rendered. Only counts once probing started.
    pub fn failed_page(&mut self) -> PageVerdict {
        if self.probe.is_some() {
            self.probe_empty()
        } else {
            PageVerdict::Continue
        }
    }

    fn probe_empty(&mut self) -> PageVerdict {
        let Some(probe) = self.probe.as_mut() else {
            return PageVerdict::Continue;
        };
        probe.remaining = probe.remaining.saturating_sub(1);
        probe.consecutive_empty += 1;

        if probe.consecutive_empty >= self.cfg.max_consecutive_empty || probe.remaining == 0 {
            PageVerdict::Stop
        } else {
            PageVerdict::Continue
        }
    }
}

// ── Strategy ──────────────────────────────────────────────────────────────────

pub struct BrowserFetch {
    launcher: Box<dyn BrowserLauncher>,
    urls: SearchUrlBuilder,
    marker: String,
    marker_wait: Duration,
    page_delay: Duration,
    cutoff: CutoffConfig,
}

impl BrowserFetch {
    pub fn new(launcher: Box<dyn BrowserLauncher>, cfg: &BrowserConfig, urls: SearchUrlBuilder) -> Self {
        Self {
            launcher,
            urls,
            marker: cfg.content_marker.clone(),
            marker_wait: Duration::from_secs(cfg.marker_wait_secs),
            page_delay: Duration::from_millis(cfg.page_delay_ms),
            cutoff: cfg.cutoff,
        }
    }

    /// Headless Chromium when the `browser` feature is compiled in.
    #[cfg(feature = "browser")]
    pub fn from_config(cfg: &BrowserConfig, urls: SearchUrlBuilder) -> Option<Self> {
        let launcher = super::chromium::ChromiumLauncher::new(cfg.chrome_executable.clone());
        Some(Self::new(Box::new(launcher), cfg, urls))
    }

    #[cfg(not(feature = "browser"))]
    pub fn from_config(_cfg: &BrowserConfig, _urls: SearchUrlBuilder) -> Option<Self> {
        debug!("Built without the browser feature; headless strategy unavailable");
        None
    }

    async fn scan(
        &self,
        renderer: &mut dyn PageRenderer,
        country: &str,
        max_pages: u32,
    ) -> Result<Vec<RawListing>, FetchError> {
        let base = self.urls.site_base(country);
        let mut cutoff = PagingCutoff::new(self.cutoff);
        let mut scanned = 0u32;
        let mut last_error = None;

        for page in 0..max_pages {
            if page > 0 && !self.page_delay.is_zero() {
                sleep(self.page_delay).await;
            }

            let url = self.urls.search_url(country, page);
            info!(country, page, "Rendering {}", url);

            let verdict = match renderer.render(&url, &self.marker, self.marker_wait).await {
                Ok(Some(html)) => {
                    scanned += 1;
                    let listings = parse_listing_page(&html, &base);
                    if !listings.is_empty() {
                        info!(country, page, "Browser page yielded {} listings", listings.len());
                        return Ok(listings);
                    }
                    debug!(country, page, "Rendered page had no job cards");
                    cutoff.empty_page()
                }
                Ok(None) => {
                    warn!(country, page, "Result marker did not appear within {:?}", self.marker_wait);
                    last_error = Some(FetchError::Transient {
                        url,
                        reason: "result marker timeout".into(),
                    });
                    cutoff.failed_page()
                }
                Err(e) => {
                    warn!(country, page, "Render failed: {:#}", e);
                    last_error = Some(FetchError::Transient {
                        url,
                        reason: format!("{:#}", e),
                    });
                    cutoff.failed_page()
                }
            };

            if verdict == PageVerdict::Stop {
                info!(country, page, "Diminishing returns, stopping pagination");
                break;
            }
        }

        Err(FetchError::nothing_found(scanned, last_error))
    }
}

#[async_trait]
impl FetchStrategy for BrowserFetch {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn fetch(&self, country: &str, max_pages: u32) -> Result<Vec<RawListing>, FetchError> {
        let mut renderer = self
            .launcher
            .launch()
            .await
            .map_err(|e| FetchError::Unavailable {
                strategy: "browser",
                reason: format!("{:#}", e),
            })?;

        let result = self.scan(renderer.as_mut(), country, max_pages).await;
        renderer.close().await;
        result
    }
}
