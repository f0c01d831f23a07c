use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub relay: RelayConfig,
    pub direct: DirectConfig,
    pub browser: BrowserConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
}

/// Target listings site
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    /// `{domain}` is replaced by the country's sub-domain token.
    pub base_url_template: String,
    pub search_path: String,
    pub query: String,
}

/// Proxy-relay strategy. Inactive unless `token` is set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub token: Option<String>,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub base_delay_ms: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub max_retries: usize,
}

/// Direct-fetch strategy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DirectConfig {
    pub proxies: Vec<String>,
    pub timeout_secs: u64,
    pub base_delay_ms: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// Added once per page already requested in the same run.
    pub page_step_ms: u64,
    pub min_body_bytes: usize,
}

/// Headless-browser strategy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub enabled: bool,
    pub chrome_executable: Option<PathBuf>,
    pub content_marker: String,
    pub marker_wait_secs: u64,
    pub page_delay_ms: u64,
    pub cutoff: CutoffConfig,
}

/// "Diminishing returns" thresholds for paged browsing.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct CutoffConfig {
    pub min_scanned_pages: u32,
    pub probe_pages: u32,
    pub max_consecutive_empty: u32,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub run_migrations: bool,
}

/// Periodic jobs, one per country
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub countries: Vec<String>,
    pub max_pages: u32,
    pub report_every_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url_template: "https://{domain}.indeed.com".to_string(),
            search_path: "/jobs".to_string(),
            query: "stage OR stagiaire OR internship".to_string(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            token: None,
            endpoint: "http://api.scraperapi.com".to_string(),
            timeout_secs: 60,
            base_delay_ms: 5_000,
            jitter_min_ms: 2_000,
            jitter_max_ms: 5_000,
            max_retries: 2,
        }
    }
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            proxies: Vec::new(),
            timeout_secs: 30,
            base_delay_ms: 5_000,
            jitter_min_ms: 5_000,
            jitter_max_ms: 10_000,
            page_step_ms: 3_000,
            min_body_bytes: 1_000,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chrome_executable: None,
            content_marker: "[data-jk], .job_seen_beacon, .resultContent".to_string(),
            marker_wait_secs: 10,
            page_delay_ms: 1_500,
            cutoff: CutoffConfig::default(),
        }
    }
}

impl Default for CutoffConfig {
    fn default() -> Self {
        Self {
            min_scanned_pages: 5,
            probe_pages: 3,
            max_consecutive_empty: 2,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/harvest.duckdb"),
            run_migrations: true,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 180,
            countries: ["Maroc", "France", "Canada", "Belgique", "Suisse"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            max_pages: 1,
            report_every_secs: 60,
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let built = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("HARVEST").separator("__"))
            .build();

        let mut app_cfg = match built.and_then(|cfg| cfg.try_deserialize::<AppConfig>()) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("Ignoring invalid configuration, using defaults: {}", e);
                AppConfig::default()
            }
        };

        app_cfg.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(app_cfg)
    }

    /// Apply the flat operator variables. Missing values leave the
    /// corresponding capability as configured (usually disabled).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("SCRAPER_API_KEY").filter(|t| !t.trim().is_empty()) {
            self.relay.token = Some(token.trim().to_string());
        }

        let disable = lookup("DISABLE_BROWSER").map(|v| is_truthy(&v)).unwrap_or(false);
        if disable || lookup("RENDER").is_some() {
            self.browser.enabled = false;
        }

        if let Some(list) = lookup("SCRAPER_PROXIES") {
            let proxies = parse_proxy_list(&list);
            if !proxies.is_empty() {
                self.direct.proxies = proxies;
            }
        }
    }
}

pub fn parse_proxy_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn absent_operator_vars_leave_optional_strategies_off() {
        let mut cfg = AppConfig::default();
        cfg.apply_env_overrides(|_| None);
        assert!(cfg.relay.token.is_none());
        assert!(cfg.browser.enabled);
        assert!(cfg.direct.proxies.is_empty());
    }

    #[test]
    fn operator_vars_enable_and_disable_capabilities() {
        let vars = env(&[
            ("SCRAPER_API_KEY", "abc123"),
            ("DISABLE_BROWSER", "true"),
            ("SCRAPER_PROXIES", "http://p1:8080, ,http://p2:3128,"),
        ]);
        let mut cfg = AppConfig::default();
        cfg.apply_env_overrides(|k| vars.get(k).cloned());

        assert_eq!(cfg.relay.token.as_deref(), Some("abc123"));
        assert!(!cfg.browser.enabled);
        assert_eq!(cfg.direct.proxies, vec!["http://p1:8080", "http://p2:3128"]);
    }

    #[test]
    fn render_marker_disables_browser() {
        let vars = env(&[("RENDER", "")]);
        let mut cfg = AppConfig::default();
        cfg.apply_env_overrides(|k| vars.get(k).cloned());
        assert!(!cfg.browser.enabled);
    }

    #[test]
    fn blank_token_is_ignored() {
        let vars = env(&[("SCRAPER_API_KEY", "   ")]);
        let mut cfg = AppConfig::default();
        cfg.apply_env_overrides(|k| vars.get(k).cloned());
        assert!(cfg.relay.token.is_none());
    }
}
