use crate::models::{NormalizedOffer, ScrapeRun};
use anyhow::{Context, Result};
use chrono::Utc;
use duckdb::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::info;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("connection lock poisoned")]
    Poisoned,
}

// ── Store seam ────────────────────────────────────────────────────────────────

/// Persistence used by the harvest pipeline.
pub trait OfferStore: Send + Sync {
    /// Insert one offer in its own transaction.
    /// `Ok(false)` means the link was already stored and nothing changed.
    fn insert_offer(&self, offer: &NormalizedOffer) -> Result<bool, StoreError>;

    fn exists_by_link(&self, link: &str) -> Result<bool, StoreError>;

    fn append_run_stat(&self, run: &ScrapeRun) -> Result<(), StoreError>;
}

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS offers_id_seq START 1;
CREATE SEQUENCE IF NOT EXISTS scraping_stats_id_seq START 1;

CREATE TABLE IF NOT EXISTS offers (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('offers_id_seq'),
    title               VARCHAR NOT NULL,
    company             VARCHAR NOT NULL DEFAULT '',
    location            VARCHAR NOT NULL DEFAULT '',
    country             VARCHAR,
    date_posted         VARCHAR DEFAULT '',
    date_posted_parsed  DATE,
    link                VARCHAR NOT NULL UNIQUE,
    created_at          TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS scraping_stats (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('scraping_stats_id_seq'),
    country             VARCHAR NOT NULL,
    offers_found        BIGINT NOT NULL DEFAULT 0,
    offers_inserted     BIGINT NOT NULL DEFAULT 0,
    execution_time      TIMESTAMP NOT NULL,
    duration_seconds    BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_offers_country  ON offers (country);
CREATE INDEX IF NOT EXISTS idx_offers_created  ON offers (created_at);
CREATE INDEX IF NOT EXISTS idx_stats_country   ON scraping_stats (country);
CREATE INDEX IF NOT EXISTS idx_stats_time      ON scraping_stats (execution_time);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Reporting ─────────────────────────────────────────────────────────────

    pub fn offer_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM offers")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    /// Stored offers per resolved country; unresolved ones are grouped as `None`.
    pub fn offers_by_country(&self) -> Result<Vec<(Option<String>, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT country, COUNT(*) AS n FROM offers GROUP BY country ORDER BY n DESC, country",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn run_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM scraping_stats")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<ScrapeRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT country, offers_found, offers_inserted, execution_time, duration_seconds
               FROM scraping_stats
               ORDER BY execution_time DESC, id DESC
               LIMIT ?"#,
        )?;
        let runs = stmt
            .query_map(params![limit as i64], |r| {
                Ok(ScrapeRun {
                    country: r.get(0)?,
                    offers_found: r.get(1)?,
                    offers_inserted: r.get(2)?,
                    execution_time: r.get(3)?,
                    duration_seconds: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

impl OfferStore for Repository {
    fn insert_offer(&self, offer: &NormalizedOffer) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            r#"INSERT INTO offers
                   (title, company, location, country, date_posted, date_posted_parsed, link, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (link) DO NOTHING"#,
            params![
                offer.title,
                offer.company,
                offer.location,
                offer.country,
                offer.date_posted,
                offer.date_posted_parsed,
                offer.link,
                offer.created_at,
            ],
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }

    fn exists_by_link(&self, link: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM offers WHERE link = ?")?;
        let n: i64 = stmt.query_row(params![link], |r| r.get(0))?;
        Ok(n > 0)
    }

    fn append_run_stat(&self, run: &ScrapeRun) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO scraping_stats
                   (country, offers_found, offers_inserted, execution_time, duration_seconds)
               VALUES (?, ?, ?, ?, ?)"#,
            params![
                run.country,
                run.offers_found,
                run.offers_inserted,
                run.execution_time,
                run.duration_seconds,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn offer(link: &str, country: Option<&str>) -> NormalizedOffer {
        let now = NaiveDate::from_ymd_opt(2024, 5, 10)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        NormalizedOffer {
            title: "Stage Backend".into(),
            company: "Acme".into(),
            location: "Casablanca".into(),
            country: country.map(str::to_string),
            date_posted: "il y a 2 jours".into(),
            date_posted_parsed: NaiveDate::from_ymd_opt(2024, 5, 8),
            link: link.into(),
            created_at: now,
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let repo = repo();
        repo.run_migrations().unwrap();
        assert_eq!(repo.offer_count().unwrap(), 0);
        assert_eq!(repo.run_count().unwrap(), 0);
    }

    #[test]
    fn test_date_posted_column_accepts_null() {
        let repo = repo();
        let conn = repo.conn().unwrap();
        conn.execute(
            "INSERT INTO offers (title, link, date_posted, created_at) VALUES (?, ?, NULL, ?)",
            params!["Stage", "https://a/null-date", Utc::now().naive_utc()],
        )
        .unwrap();
        let stored: Option<String> = conn
            .query_row(
                "SELECT date_posted FROM offers WHERE link = 'https://a/null-date'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stored, None);
    }

    #[test]
    fn test_duplicate_link_is_rejected() {
        let repo = repo();
        let o = offer("https://ma.indeed.com/viewjob?jk=1", Some("Maroc"));

        assert!(!repo.exists_by_link(&o.link).unwrap());
        assert!(repo.insert_offer(&o).unwrap());
        assert!(repo.exists_by_link(&o.link).unwrap());

        let again = NormalizedOffer {
            title: "Other title".into(),
            ..o.clone()
        };
        assert!(!repo.insert_offer(&again).unwrap());
        assert_eq!(repo.offer_count().unwrap(), 1);
    }

    #[test]
    fn test_offers_grouped_by_country() {
        let repo = repo();
        repo.insert_offer(&offer("https://a/1", Some("Maroc"))).unwrap();
        repo.insert_offer(&offer("https://a/2", Some("Maroc"))).unwrap();
        repo.insert_offer(&offer("https://a/3", None)).unwrap();

        let grouped = repo.offers_by_country().unwrap();
        assert_eq!(grouped[0], (Some("Maroc".to_string()), 2));
        assert!(grouped.contains(&(None, 1)));
    }

    #[test]
    fn test_run_stats_round_trip_newest_first() {
        let repo = repo();
        let t0 = NaiveDate::from_ymd_opt(2024, 5, 10)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        for (i, country) in ["Maroc", "France"].iter().enumerate() {
            repo.append_run_stat(&ScrapeRun {
                country: country.to_string(),
                offers_found: 3,
                offers_inserted: i as i64,
                execution_time: t0 + chrono::Duration::minutes(i as i64 * 3),
                duration_seconds: 12,
            })
            .unwrap();
        }

        let runs = repo.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].country, "France");
        assert_eq!(runs[1].execution_time, t0);
        assert_eq!(repo.recent_runs(1).unwrap().len(), 1);
    }
}
