use crate::models::RawListing;
use crate::scraper::cleaner::collapse_whitespace;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

// ── Selector tables (first hit wins) ──────────────────────────────────────────

fn selectors(list: &[&str]) -> Vec<Selector> {
    list.iter().filter_map(|s| Selector::parse(s).ok()).collect()
}

static CARD: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "div.job_seen_beacon",
        ".resultContent",
        ".jobsearch-SerpJobCard",
        "[data-jk]",
        "div[data-testid='job-card']",
    ])
});

static TITLE_LINK: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&["h2 a", "a.jcs-JobTitle", "a[aria-label]", "a[data-jk]"])
});

static COMPANY: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "span[data-testid='company-name']",
        "span.companyName",
        ".companyName",
    ])
});

static LOCATION: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "div[data-testid='text-location']",
        "div.companyLocation",
        ".companyLocation",
    ])
});

static DATE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "span[data-testid='myJobsStateDate']",
        "span.date",
        "span.postedAt",
        "div.resultFooter .date",
        ".jobCardShelfContainer .date",
        "span[title*='Posted']",
        "[data-testid*='date']",
    ])
});

/// Containers whose text is a date only when it carries a temporal keyword.
static DATE_CONTAINER: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "div.jobCardReqMore",
        "span.jobCardReqMore",
        "div.jobCardShelfContainer",
        "span.jobCardShelfContainer",
        "ul.metadataContainer li",
        "ul.metadataContainer span",
        "div.metadataContainer li",
        "div.metadataContainer span",
    ])
});

const TEMPORAL_KEYWORDS: &[&str] = &[
    "il y a", "jour", "heure", "semaine", "mois", "posted", "hier", "ago",
];

// ── Page → cards ──────────────────────────────────────────────────────────────

/// Extract every acceptable job card from one result page.
/// Cards without a title or a link are dropped.
pub fn parse_listing_page(html: &str, base_url: &str) -> Vec<RawListing> {
    let doc = Html::parse_document(html);
    let base = Url::parse(base_url).ok();

    let cards: Vec<ElementRef> = CARD
        .iter()
        .map(|sel| doc.select(sel).collect::<Vec<_>>())
        .find(|found| !found.is_empty())
        .unwrap_or_default();

    cards
        .into_iter()
        .map(|card| parse_job_card(card, base.as_ref()))
        .filter(|l| !l.title.is_empty() && !l.link.is_empty())
        .collect()
}

pub fn parse_job_card(card: ElementRef, base: Option<&Url>) -> RawListing {
    let (title, link) = title_and_link(card, base).unwrap_or_default();
    let company = first_text(card, &COMPANY);
    let location = first_text(card, &LOCATION);
    let date_posted = date_text(card, &[title.as_str(), company.as_str(), location.as_str()]);

    RawListing {
        title,
        company,
        location,
        date_posted,
        link,
    }
}

fn title_and_link(card: ElementRef, base: Option<&Url>) -> Option<(String, String)> {
    TITLE_LINK
        .iter()
        .flat_map(|sel| card.select(sel))
        .find_map(|a| {
            let title = element_text(a);
            let href = a.value().attr("href")?.trim();
            if title.is_empty() || href.is_empty() {
                return None;
            }
            Some((title, resolve_link(href, base)?))
        })
}

fn resolve_link(href: &str, base: Option<&Url>) -> Option<String> {
    match base {
        Some(base) => base.join(href).ok().map(|u| u.to_string()),
        None => Url::parse(href).ok().map(|u| u.to_string()),
    }
}

fn date_text(card: ElementRef, exclude: &[&str]) -> String {
    let dedicated = first_text(card, &DATE);
    if !dedicated.is_empty() {
        return dedicated;
    }

    let container = DATE_CONTAINER
        .iter()
        .flat_map(|sel| card.select(sel))
        .map(element_text)
        .find(|t| has_temporal_keyword(t));
    if let Some(text) = container {
        return text;
    }

    // Last resort: any bare text node mentioning time.
    card.text()
        .map(collapse_whitespace)
        .find(|t| !t.is_empty() && !exclude.contains(&t.as_str()) && has_temporal_keyword(t))
        .unwrap_or_default()
}

fn has_temporal_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    TEMPORAL_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn first_text(card: ElementRef, sels: &[Selector]) -> String {
    sels.iter()
        .flat_map(|sel| card.select(sel))
        .map(element_text)
        .find(|t| !t.is_empty())
        .unwrap_or_default()
}

fn element_text(el: ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
