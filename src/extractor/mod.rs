//! Extractor contract (§6, §9): a pure function `extract(html, url) ->
//! Record|None`, free of network I/O, plus the pagination contract used by
//! the site-scraping dispatcher (§4.5: `first_search_url`, `parse_results`,
//! `is_last_page`, `next_url`).
//!
//! Per-site extractors and pagination helpers form a closed set (§9
//! redesign point: "dynamic dispatch on site -> tagged variants"), so they
//! are represented as one `SiteProfile` enum with a match per operation
//! rather than a trait object looked up by name at runtime. New module —
//! no teacher counterpart (the teacher extracts IPTV channel metadata from
//! M3U/XMLTV, not HTML listing pages); HTML parsing is grounded on
//! `other_examples/b4518660_dIB59-seo__src-tauri-src-service-job_processor_v2.rs.rs`,
//! the only file in the retrieval pack that parses HTML with the `scraper`
//! crate.

use scraper::{Html, Selector};

/// Opaque-to-the-core record, carrying the normalized attributes (§3) the
/// reference sink and linkage module need.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRecord {
    pub url: String,
    pub source: String,
    pub price: f64,
    pub neighborhood: String,
    pub sqm: Option<f64>,
    pub rooms: Option<u32>,
    pub floor: Option<i32>,
    pub building_type: String,
}

/// The closed set of supported sites (§9). Adding a site means adding a
/// variant and its match arms, not registering a new dynamic implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteProfile {
    ListingsBg,
}

impl SiteProfile {
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "listings.bg" => Some(SiteProfile::ListingsBg),
            _ => None,
        }
    }

    /// The first page of a site's paginated search (§4.5 stage 1).
    pub fn first_search_url(&self, base_url: &str) -> String {
        match self {
            SiteProfile::ListingsBg => format!("{}/sales/apartments?page=1", base_url.trim_end_matches('/')),
        }
    }

    pub fn next_url(&self, base_url: &str, page: u32) -> String {
        match self {
            SiteProfile::ListingsBg => format!("{}/sales/apartments?page={}", base_url.trim_end_matches('/'), page),
        }
    }

    /// Listing detail URLs found on a search-results page.
    pub fn parse_results(&self, html: &[u8]) -> Vec<String> {
        match self {
            SiteProfile::ListingsBg => {
                let document = Html::parse_document(&String::from_utf8_lossy(html));
                let Ok(selector) = Selector::parse("a.listing-card") else { return Vec::new() };
                document
                    .select(&selector)
                    .filter_map(|el| el.value().attr("href"))
                    .map(|href| href.to_string())
                    .collect()
            }
        }
    }

    /// True once a search-results page has no "next" pagination control,
    /// i.e. the site's own signal that walking is complete (§4.5 stage 1).
    pub fn is_last_page(&self, html: &[u8], _page: u32) -> bool {
        match self {
            SiteProfile::ListingsBg => {
                let document = Html::parse_document(&String::from_utf8_lossy(html));
                let Ok(selector) = Selector::parse("a.pagination-next") else { return true };
                document.select(&selector).next().is_none()
            }
        }
    }

    /// Pure extraction from a fetched detail page (§6: no network I/O).
    pub fn extract(&self, html: &[u8], url: &str) -> Option<ListingRecord> {
        match self {
            SiteProfile::ListingsBg => extract_listings_bg(html, url),
        }
    }
}

fn select_text(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next().map(|el| el.text().collect::<String>().trim().to_string())
}

fn parse_price(text: &str) -> Option<f64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    digits.parse().ok()
}

fn parse_sqm(text: &str) -> Option<f64> {
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
    digits.parse().ok()
}

fn parse_u32(text: &str) -> Option<u32> {
    text.chars().filter(|c| c.is_ascii_digit()).collect::<String>().parse().ok()
}

fn parse_i32(text: &str) -> Option<i32> {
    text.trim().parse().ok()
}

fn extract_listings_bg(html: &[u8], url: &str) -> Option<ListingRecord> {
    let document = Html::parse_document(&String::from_utf8_lossy(html));

    let price = select_text(&document, ".listing-price").and_then(|t| parse_price(&t))?;
    let neighborhood = select_text(&document, ".listing-neighborhood").unwrap_or_default();
    let building_type = select_text(&document, ".listing-building-type").unwrap_or_default();
    let sqm = select_text(&document, ".listing-sqm").and_then(|t| parse_sqm(&t));
    let rooms = select_text(&document, ".listing-rooms").and_then(|t| parse_u32(&t));
    let floor = select_text(&document, ".listing-floor").and_then(|t| parse_i32(&t));

    Some(ListingRecord { url: url.to_string(), source: "listings.bg".to_string(), price, neighborhood, sqm, rooms, floor, building_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL_PAGE: &str = r#"
        <html><body>
            <span class="listing-price">150,000 EUR</span>
            <span class="listing-neighborhood">Lozenets</span>
            <span class="listing-building-type">brick</span>
            <span class="listing-sqm">85 sq.m.</span>
            <span class="listing-rooms">3 rooms</span>
            <span class="listing-floor">3</span>
        </body></html>
    "#;

    const SEARCH_PAGE: &str = r#"
        <html><body>
            <a class="listing-card" href="/ad/1">one</a>
            <a class="listing-card" href="/ad/2">two</a>
            <a class="pagination-next" href="?page=2">Next</a>
        </body></html>
    "#;

    const LAST_SEARCH_PAGE: &str = r#"
        <html><body>
            <a class="listing-card" href="/ad/3">three</a>
        </body></html>
    "#;

    #[test]
    fn extracts_all_fields_from_detail_page() {
        let profile = SiteProfile::ListingsBg;
        let record = profile.extract(DETAIL_PAGE.as_bytes(), "https://listings.bg/ad/1").unwrap();
        assert_eq!(record.price, 150_000.0);
        assert_eq!(record.neighborhood, "Lozenets");
        assert_eq!(record.building_type, "brick");
        assert_eq!(record.sqm, Some(85.0));
        assert_eq!(record.rooms, Some(3));
        assert_eq!(record.floor, Some(3));
    }

    #[test]
    fn missing_price_yields_none_not_panic() {
        let profile = SiteProfile::ListingsBg;
        let record = profile.extract(b"<html><body>no price here</body></html>", "https://listings.bg/ad/2");
        assert!(record.is_none());
    }

    #[test]
    fn parses_result_urls_from_search_page() {
        let profile = SiteProfile::ListingsBg;
        let urls = profile.parse_results(SEARCH_PAGE.as_bytes());
        assert_eq!(urls, vec!["/ad/1".to_string(), "/ad/2".to_string()]);
    }

    #[test]
    fn detects_last_page_by_absent_next_control() {
        let profile = SiteProfile::ListingsBg;
        assert!(!profile.is_last_page(SEARCH_PAGE.as_bytes(), 1));
        assert!(profile.is_last_page(LAST_SEARCH_PAGE.as_bytes(), 2));
    }

    #[test]
    fn by_name_resolves_known_site_and_rejects_unknown() {
        assert_eq!(SiteProfile::by_name("listings.bg"), Some(SiteProfile::ListingsBg));
        assert_eq!(SiteProfile::by_name("unknown.example"), None);
    }
}
