//! Pipeline orchestrator: fetch chain → normalisation → storage → run stats.
//!
//! One call to [`Pipeline::run_scrape_job`] is one harvest of one country:
//!   1. Ask the strategy chain for a page of listings (first strategy that
//!      delivers wins).
//!   2. Normalise each listing and insert it unless its link is already known.
//!      Every insert is its own transaction; a failing record is logged and
//!      skipped.
//!   3. Append exactly one `scraping_stats` row, even when nothing was found.
//!
//! The job never returns an error. Whatever goes wrong is logged and shows up
//! as zero counts in the run stats.

use crate::config::AppConfig;
use crate::models::{NormalizedOffer, RawListing, ScrapeRun};
use crate::scraper::cleaner::normalize_listing;
use crate::scraper::{FetchError, StrategyChain};
use crate::storage::{OfferStore, Repository};
use crate::utils::Timer;
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

pub struct Pipeline {
    chain: Arc<StrategyChain>,
    store: Arc<dyn OfferStore>,
}

/// Outcome of one scrape job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub offers_found: usize,
    pub offers_inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl Pipeline {
    pub fn new(chain: StrategyChain, store: Arc<dyn OfferStore>) -> Self {
        Self {
            chain: Arc::new(chain),
            store,
        }
    }

    /// Open the configured database and build the fetch chain.
    /// The repository handle is returned too, for reporting.
    pub fn from_config(config: &AppConfig) -> Result<(Self, Arc<Repository>)> {
        let repo = Arc::new(
            Repository::open(&config.storage.db_path).context("Failed to open DuckDB")?,
        );
        if config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let chain = StrategyChain::from_config(config);
        info!("Fetch strategies: {}", chain.names().join(" → "));

        let store: Arc<dyn OfferStore> = repo.clone();
        Ok((Self::new(chain, store), repo))
    }

    pub async fn run_scrape_job(&self, max_pages: u32, country: &str) -> JobSummary {
        let timer = Timer::start(format!("scrape {country}"));
        let now = Local::now().naive_local();
        info!(country, max_pages, "Starting scrape job");

        let listings = match self.fetch_isolated(country, max_pages).await {
            Ok(Ok(listings)) => listings,
            Ok(Err(e @ FetchError::Exhausted { .. })) => {
                warn!(country, "No listings this run: {}", e);
                Vec::new()
            }
            Ok(Err(e)) => {
                error!(country, "Scrape job failed: {}", e);
                Vec::new()
            }
            Err(e) => {
                error!(country, "Fetch stage aborted: {}", e);
                Vec::new()
            }
        };

        let summary = self.insert_new_offers(&listings, now.date(), now);
        self.record_run_stats(country, &summary, now, timer.elapsed_secs());

        info!(
            country,
            "Done: {} found | {} inserted | {} duplicates | {} rejected | {} failed",
            summary.offers_found,
            summary.offers_inserted,
            summary.duplicates,
            summary.rejected,
            summary.failed
        );
        summary
    }

    /// Run the strategy chain on its own task so a panicking strategy
    /// surfaces as a `JoinError` instead of unwinding through the job.
    async fn fetch_isolated(
        &self,
        country: &str,
        max_pages: u32,
    ) -> Result<Result<Vec<RawListing>, FetchError>, JoinError> {
        let chain = Arc::clone(&self.chain);
        let country = country.to_string();
        tokio::spawn(async move { chain.fetch(&country, max_pages).await }).await
    }

    /// Normalise and persist listings, skipping links already stored.
    pub fn insert_new_offers(
        &self,
        listings: &[RawListing],
        today: NaiveDate,
        now: NaiveDateTime,
    ) -> JobSummary {
        let mut summary = JobSummary {
            offers_found: listings.len(),
            ..JobSummary::default()
        };

        for raw in listings {
            let Some(offer) = normalize_listing(raw, today, now) else {
                debug!("Dropping listing without title or link: {:?}", raw);
                summary.rejected += 1;
                continue;
            };

            match self.store_offer(&offer) {
                Ok(true) => summary.offers_inserted += 1,
                Ok(false) => {
                    debug!("Duplicate offer: {}", offer.link);
                    summary.duplicates += 1;
                }
                Err(e) => {
                    error!("Failed to store {}: {:#}", offer.link, e);
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    fn store_offer(&self, offer: &NormalizedOffer) -> Result<bool> {
        if self.store.exists_by_link(&offer.link)? {
            return Ok(false);
        }
        Ok(self.store.insert_offer(offer)?)
    }

    /// Append the run's stats row. Failures are logged, never propagated.
    pub fn record_run_stats(
        &self,
        country: &str,
        summary: &JobSummary,
        execution_time: NaiveDateTime,
        duration_seconds: i64,
    ) {
        let run = ScrapeRun {
            country: country.to_string(),
            offers_found: summary.offers_found as i64,
            offers_inserted: summary.offers_inserted as i64,
            execution_time,
            duration_seconds,
        };

        if let Err(e) = self.store.append_run_stat(&run) {
            error!(country, "Could not record run stats: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::FetchStrategy;
    use crate::scraper::testing::{Scripted, ScriptedStrategy, listings};
    use crate::storage::StoreError;
    use std::sync::atomic::Ordering;

    fn repo() -> Arc<Repository> {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        repo.run_migrations().unwrap();
        repo
    }

    fn chain(strategies: Vec<Box<dyn FetchStrategy>>) -> StrategyChain {
        StrategyChain::new(strategies)
    }

    #[tokio::test]
    async fn test_first_delivering_strategy_feeds_the_store() {
        let repo = repo();
        let (a, _) = ScriptedStrategy::new("a", Scripted::Empty);
        let (b, _) = ScriptedStrategy::new("b", Scripted::Listings(listings(5)));
        let (c, c_calls) = ScriptedStrategy::new("c", Scripted::Listings(listings(7)));
        let pipeline = Pipeline::new(chain(vec![Box::new(a), Box::new(b), Box::new(c)]), repo.clone());

        let summary = pipeline.run_scrape_job(1, "Maroc").await;

        assert_eq!(summary.offers_found, 5);
        assert_eq!(summary.offers_inserted, 5);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
        assert_eq!(repo.offer_count().unwrap(), 5);

        let runs = repo.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].country, "Maroc");
        assert_eq!((runs[0].offers_found, runs[0].offers_inserted), (5, 5));
    }

    #[tokio::test]
    async fn test_rerun_inserts_nothing_new() {
        let repo = repo();
        let (s, _) = ScriptedStrategy::new("s", Scripted::Listings(listings(1)));
        let pipeline = Pipeline::new(chain(vec![Box::new(s)]), repo.clone());

        assert_eq!(pipeline.run_scrape_job(1, "France").await.offers_inserted, 1);
        let second = pipeline.run_scrape_job(1, "France").await;

        assert_eq!(second.offers_found, 1);
        assert_eq!(second.offers_inserted, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(repo.offer_count().unwrap(), 1);
        assert_eq!(repo.run_count().unwrap(), 2);
        assert_eq!(repo.recent_runs(1).unwrap()[0].offers_inserted, 0);
    }

    #[tokio::test]
    async fn test_duplicates_within_one_batch() {
        let repo = repo();
        let mut batch = listings(2);
        batch.push(batch[0].clone());
        let (s, _) = ScriptedStrategy::new("s", Scripted::Listings(batch));
        let pipeline = Pipeline::new(chain(vec![Box::new(s)]), repo.clone());

        let summary = pipeline.run_scrape_job(1, "Canada").await;
        assert_eq!((summary.offers_found, summary.offers_inserted, summary.duplicates), (3, 2, 1));
    }

    #[tokio::test]
    async fn test_exhausted_chain_still_records_a_zero_row() {
        let repo = repo();
        let (a, _) = ScriptedStrategy::new("a", Scripted::Blocked);
        let (b, _) = ScriptedStrategy::new("b", Scripted::Empty);
        let pipeline = Pipeline::new(chain(vec![Box::new(a), Box::new(b)]), repo.clone());

        let summary = pipeline.run_scrape_job(3, "Suisse").await;
        assert_eq!(summary, JobSummary::default());

        let runs = repo.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!((runs[0].offers_found, runs[0].offers_inserted), (0, 0));
    }

    struct PanickingStrategy;

    #[async_trait::async_trait]
    impl FetchStrategy for PanickingStrategy {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn fetch(&self, _country: &str, _max_pages: u32) -> Result<Vec<RawListing>, FetchError> {
            panic!("selector table corrupted");
        }
    }

    #[tokio::test]
    async fn test_panicking_fetch_still_records_a_zero_row() {
        let repo = repo();
        let pipeline = Pipeline::new(chain(vec![Box::new(PanickingStrategy)]), repo.clone());

        let summary = pipeline.run_scrape_job(1, "Maroc").await;
        assert_eq!(summary, JobSummary::default());

        let runs = repo.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].country, "Maroc");
        assert_eq!((runs[0].offers_found, runs[0].offers_inserted), (0, 0));
    }

    /// Rejects one specific link and every stats write.
    struct FlakyStore {
        inner: Arc<Repository>,
        poisoned_link: String,
    }

    impl OfferStore for FlakyStore {
        fn insert_offer(&self, offer: &NormalizedOffer) -> Result<bool, StoreError> {
            if offer.link == self.poisoned_link {
                return Err(StoreError::Poisoned);
            }
            self.inner.insert_offer(offer)
        }

        fn exists_by_link(&self, link: &str) -> Result<bool, StoreError> {
            self.inner.exists_by_link(link)
        }

        fn append_run_stat(&self, _run: &ScrapeRun) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    #[tokio::test]
    async fn test_store_failures_do_not_abort_the_batch() {
        let repo = repo();
        let batch = listings(4);
        let store = Arc::new(FlakyStore {
            inner: repo.clone(),
            poisoned_link: batch[1].link.clone(),
        });
        let (s, _) = ScriptedStrategy::new("s", Scripted::Listings(batch));
        let pipeline = Pipeline::new(chain(vec![Box::new(s)]), store);

        let summary = pipeline.run_scrape_job(1, "Belgique").await;
        assert_eq!(summary.offers_inserted, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(repo.offer_count().unwrap(), 3);
        assert_eq!(repo.run_count().unwrap(), 0);
    }

    #[test]
    fn test_listing_without_link_is_rejected() {
        let repo = repo();
        let pipeline = Pipeline::new(chain(vec![]), repo.clone());
        let now = Local::now().naive_local();
        let bad = RawListing {
            title: "Stage".into(),
            ..RawListing::default()
        };

        let summary = pipeline.insert_new_offers(&[bad], now.date(), now);
        assert_eq!((summary.offers_found, summary.rejected), (1, 1));
        assert_eq!(repo.offer_count().unwrap(), 0);
    }
}
