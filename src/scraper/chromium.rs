//! Headless Chromium backend for the browser strategy.

use super::browser::{BrowserLauncher, PageRenderer};
use super::http_client::random_user_agent;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

const HIDE_WEBDRIVER: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined })";

const MARKER_POLL: Duration = Duration::from_millis(250);

pub struct ChromiumLauncher {
    executable: Option<PathBuf>,
}

impl ChromiumLauncher {
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self { executable }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn PageRenderer>> {
        let mut builder = BrowserConfig::builder();
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }

        let config = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--window-size=1920,1080")
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        debug!("Chromium session started");
        Ok(Box::new(ChromiumSession {
            browser,
            handler_task,
        }))
    }
}

struct ChromiumSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl PageRenderer for ChromiumSession {
    async fn render(&mut self, url: &str, marker: &str, wait: Duration) -> Result<Option<String>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to open tab")?;

        let result = render_in(&page, url, marker, wait).await;
        if let Err(e) = page.close().await {
            debug!("Tab close: {}", e);
        }
        result
    }

    async fn close(self: Box<Self>) {
        let ChromiumSession {
            mut browser,
            handler_task,
        } = *self;

        if let Err(e) = browser.close().await {
            debug!("Chromium close: {}", e);
        }
        if let Err(e) = browser.wait().await {
            debug!("Chromium wait: {}", e);
        }
        handler_task.abort();
    }
}

async fn render_in(page: &Page, url: &str, marker: &str, wait: Duration) -> Result<Option<String>> {
    page.execute(SetUserAgentOverrideParams::new(random_user_agent().to_string()))
        .await?;

    tokio::time::timeout(wait, page.goto(url))
        .await
        .map_err(|_| anyhow!("navigation timed out after {:?} for {}", wait, url))?
        .with_context(|| format!("navigation failed for {url}"))?;

    if let Err(e) = page.evaluate(HIDE_WEBDRIVER).await {
        debug!("webdriver mask skipped: {}", e);
    }

    let appeared = tokio::time::timeout(wait, async {
        while page.find_element(marker).await.is_err() {
            tokio::time::sleep(MARKER_POLL).await;
        }
    })
    .await
    .is_ok();

    if !appeared {
        return Ok(None);
    }

    Ok(Some(page.content().await?))
}
