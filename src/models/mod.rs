use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ── Country ───────────────────────────────────────────────────────────────────

/// National listing sites the harvester knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Country {
    Maroc,
    France,
    Canada,
    Belgique,
    Suisse,
}

impl Country {
    pub const ALL: [Country; 5] = [
        Country::Maroc,
        Country::France,
        Country::Canada,
        Country::Belgique,
        Country::Suisse,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Country::Maroc => "Maroc",
            Country::France => "France",
            Country::Canada => "Canada",
            Country::Belgique => "Belgique",
            Country::Suisse => "Suisse",
        }
    }

    /// Sub-domain token of the national listings site.
    pub fn domain(self) -> &'static str {
        match self {
            Country::Maroc => "ma",
            Country::France => "fr",
            Country::Canada => "ca",
            Country::Belgique => "be",
            Country::Suisse => "ch",
        }
    }

    /// Exact (case-sensitive) lookup by the French country name.
    pub fn from_name(name: &str) -> Option<Country> {
        Country::ALL.into_iter().find(|c| c.name() == name.trim())
    }
}

impl std::fmt::Display for Country {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Raw listing (extraction output) ───────────────────────────────────────────

/// One job card as scraped. Empty strings mean "not found on the card".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawListing {
    pub title: String,
    pub company: String,
    pub location: String,
    pub date_posted: String,
    pub link: String,
}

// ── Normalized offer (persisted) ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOffer {
    pub title: String,
    pub company: String,
    pub location: String,
    pub country: Option<String>,
    pub date_posted: String,
    pub date_posted_parsed: Option<NaiveDate>,
    pub link: String, // canonical, unique
    pub created_at: NaiveDateTime,
}

// ── Scrape run log ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub country: String,
    pub offers_found: i64,
    pub offers_inserted: i64,
    pub execution_time: NaiveDateTime,
    pub duration_seconds: i64,
}
