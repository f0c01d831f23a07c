//! Search URL construction for the national listings sites.

use crate::config::SiteConfig;
use crate::models::Country;

/// Listings per result page on the target site.
pub const PAGE_SIZE: u32 = 10;

/// Sub-domain token for a country name; unknown names fall back to Maroc.
pub fn domain_for(country: &str) -> &'static str {
    Country::from_name(country)
        .unwrap_or(Country::Maroc)
        .domain()
}

#[derive(Debug, Clone)]
pub struct SearchUrlBuilder {
    base_url_template: String,
    search_path: String,
    query: String,
}

impl SearchUrlBuilder {
    pub fn new(site: &SiteConfig) -> Self {
        Self {
            base_url_template: site.base_url_template.trim_end_matches('/').to_string(),
            search_path: format!("/{}", site.search_path.trim_start_matches('/')),
            query: site.query.clone(),
        }
    }

    /// Site root for a country, used to resolve relative card links.
    pub fn site_base(&self, country: &str) -> String {
        self.base_url_template.replace("{domain}", domain_for(country))
    }

    /// Paginated search URL. `page` is zero-based.
    pub fn search_url(&self, country: &str, page: u32) -> String {
        let start = page.saturating_mul(PAGE_SIZE).to_string();
        let params = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("q", &self.query)
            .append_pair("start", &start)
            .append_pair("l", country)
            .finish();
        format!("{}{}?{}", self.site_base(country), self.search_path, params)
    }
}

impl Default for SearchUrlBuilder {
    fn default() -> Self {
        Self::new(&SiteConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_url(country: &str, page: u32) -> String {
        SearchUrlBuilder::default().search_url(country, page)
    }

    #[test]
    fn maps_known_countries_to_their_domain() {
        assert!(search_url("France", 0).starts_with("https://fr.indeed.com/jobs?"));
        assert!(search_url("Canada", 0).starts_with("https://ca.indeed.com/jobs?"));
        assert!(search_url("Suisse", 0).starts_with("https://ch.indeed.com/jobs?"));
    }

    #[test]
    fn unknown_country_uses_maroc_domain() {
        let url = search_url("Atlantis", 0);
        assert!(url.starts_with("https://ma.indeed.com/jobs?"));
        assert!(url.ends_with("&l=Atlantis"));
    }

    #[test]
    fn page_offset_is_ten_per_page() {
        assert!(search_url("Maroc", 0).contains("&start=0&"));
        assert!(search_url("Maroc", 3).contains("&start=30&"));
    }

    #[test]
    fn query_is_form_encoded() {
        let url = search_url("Belgique", 1);
        assert_eq!(
            url,
            "https://be.indeed.com/jobs?q=stage+OR+stagiaire+OR+internship&start=10&l=Belgique"
        );
    }

    #[test]
    fn template_without_placeholder_is_used_verbatim() {
        let site = SiteConfig {
            base_url_template: "http://127.0.0.1:9999/".to_string(),
            ..SiteConfig::default()
        };
        let builder = SearchUrlBuilder::new(&site);
        assert_eq!(builder.site_base("France"), "http://127.0.0.1:9999");
        assert!(builder.search_url("France", 0).starts_with("http://127.0.0.1:9999/jobs?q="));
    }
}
