use crate::models::{Country, NormalizedOffer, RawListing};
use chrono::{Days, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

// ── Date normalisation ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum DateRule {
    /// Relative offset: captured count × `days` days ago.
    DaysAgo(u64),
    /// Relative hours, truncated to whole days.
    HoursAgo,
    Today,
    Yesterday,
    DayMonthYear,
    IsoDate,
}

/// Ordered: the first matching pattern decides.
static DATE_RULES: LazyLock<Vec<(Regex, DateRule)>> = LazyLock::new(|| {
    [
        (r"il y a (\d+)\+? ?jour", DateRule::DaysAgo(1)),
        (r"il y a (\d+)\+? ?heure", DateRule::HoursAgo),
        (r"il y a (\d+)\+? ?semaine", DateRule::DaysAgo(7)),
        (r"il y a (\d+)\+? ?mois", DateRule::DaysAgo(30)),
        (r"il y a plus de (\d+) jour", DateRule::DaysAgo(1)),
        (r"(\d+)\+? ?days? ago", DateRule::DaysAgo(1)),
        (r"(\d+)\+? ?hours? ago", DateRule::HoursAgo),
        (r"(\d+)\+? ?weeks? ago", DateRule::DaysAgo(7)),
        (r"(\d+)\+? ?months? ago", DateRule::DaysAgo(30)),
        (r"aujourd['’]hui|\btoday\b|just posted|à l['’]instant", DateRule::Today),
        (r"\bhier\b|\byesterday\b", DateRule::Yesterday),
        (r"(\d+)/(\d+)/(\d+)", DateRule::DayMonthYear),
        (r"(\d{4})-(\d{2})-(\d{2})", DateRule::IsoDate),
    ]
    .into_iter()
    .filter_map(|(pattern, rule)| Regex::new(pattern).ok().map(|re| (re, rule)))
    .collect()
});

/// Turn a free-text posting date into a calendar date relative to `today`.
/// "il y a 2 jours" → today − 2 days | "15/10/2024" → 2024-10-15 | "" → None
///
/// Overflowing counts and impossible calendar values fall through to the
/// next pattern instead of failing.
pub fn parse_date_posted(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }

    DATE_RULES.iter().find_map(|(re, rule)| {
        let caps = re.captures(&text)?;
        let num = |i: usize| caps.get(i)?.as_str().parse::<u64>().ok();

        match *rule {
            DateRule::DaysAgo(unit) => {
                let days = num(1)?.checked_mul(unit)?;
                today.checked_sub_days(Days::new(days))
            }
            DateRule::HoursAgo => today.checked_sub_days(Days::new(num(1)? / 24)),
            DateRule::Today => Some(today),
            DateRule::Yesterday => today.checked_sub_days(Days::new(1)),
            DateRule::DayMonthYear => ymd(num(3)?, num(2)?, num(1)?),
            DateRule::IsoDate => ymd(num(1)?, num(2)?, num(3)?),
        }
    })
}

fn ymd(year: u64, month: u64, day: u64) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(
        i32::try_from(year).ok()?,
        u32::try_from(month).ok()?,
        u32::try_from(day).ok()?,
    )
}

// ── Country resolution ────────────────────────────────────────────────────────

const COUNTRY_KEYWORDS: &[(Country, &[&str])] = &[
    (Country::France, &["france", "français", "french"]),
    (Country::Maroc, &["maroc", "morocco", "marocain"]),
    (Country::Belgique, &["belgique", "belgium", "belge"]),
    (Country::Suisse, &["suisse", "switzerland"]),
    (Country::Canada, &["canada", "canadian", "canadien"]),
];

const CITY_COUNTRY: &[(&str, Country)] = &[
    ("paris", Country::France),
    ("lyon", Country::France),
    ("marseille", Country::France),
    ("toulouse", Country::France),
    ("nice", Country::France),
    ("nantes", Country::France),
    ("strasbourg", Country::France),
    ("montpellier", Country::France),
    ("bordeaux", Country::France),
    ("lille", Country::France),
    ("rennes", Country::France),
    ("reims", Country::France),
    ("casablanca", Country::Maroc),
    ("rabat", Country::Maroc),
    ("fès", Country::Maroc),
    ("fes", Country::Maroc),
    ("marrakech", Country::Maroc),
    ("agadir", Country::Maroc),
    ("tanger", Country::Maroc),
    ("meknès", Country::Maroc),
    ("oujda", Country::Maroc),
    ("kenitra", Country::Maroc),
    ("tétouan", Country::Maroc),
    ("salé", Country::Maroc),
    ("bruxelles", Country::Belgique),
    ("anvers", Country::Belgique),
    ("gand", Country::Belgique),
    ("charleroi", Country::Belgique),
    ("genève", Country::Suisse),
    ("zurich", Country::Suisse),
    ("bâle", Country::Suisse),
    ("berne", Country::Suisse),
    ("montréal", Country::Canada),
    ("toronto", Country::Canada),
    ("vancouver", Country::Canada),
    ("ottawa", Country::Canada),
];

/// Infer a country from a location string: country names first, then cities.
pub fn resolve_country(location: &str) -> Option<Country> {
    let location = location.to_lowercase();
    if location.trim().is_empty() {
        return None;
    }

    COUNTRY_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| location.contains(w)))
        .map(|(country, _)| *country)
        .or_else(|| {
            CITY_COUNTRY
                .iter()
                .find(|(city, _)| location.contains(city))
                .map(|(_, country)| *country)
        })
}

// ── Text + links ──────────────────────────────────────────────────────────────

/// Collapse runs of whitespace (including NBSP) to single spaces.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Absolute link without its fragment; the uniqueness key of an offer.
pub fn canonical_link(link: &str) -> String {
    let link = link.trim();
    match Url::parse(link) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => link.to_string(),
    }
}

// ── RawListing → NormalizedOffer ──────────────────────────────────────────────

/// Enrich a scraped card. Returns None only when title or link is missing;
/// every other field degrades to empty/None on its own.
pub fn normalize_listing(
    raw: &RawListing,
    today: NaiveDate,
    now: NaiveDateTime,
) -> Option<NormalizedOffer> {
    let title = collapse_whitespace(&raw.title);
    let link = canonical_link(&raw.link);
    if title.is_empty() || link.is_empty() {
        return None;
    }

    let location = collapse_whitespace(&raw.location);
    let date_posted = collapse_whitespace(&raw.date_posted);

    Some(NormalizedOffer {
        title,
        company: collapse_whitespace(&raw.company),
        country: resolve_country(&location).map(|c| c.name().to_string()),
        date_posted_parsed: parse_date_posted(&date_posted, today),
        date_posted,
        location,
        link,
        created_at: now,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
