//! SeLoger search index and detail pages, fetched through Scrapfly.

use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use crate::models::{GardenStatus, Listing, ListingRef, SearchParams};
use crate::plugins::sources::ScrapflyClient;
use crate::plugins::traits::ListingSource;
use crate::utils::error::{AppError, Result};

const LISTING_LINK_SELECTOR: &str = r#"a[data-testid="sl.explore.coveringLink"]"#;
const NEXT_DATA_SELECTOR: &str = "script#__NEXT_DATA__";
const PAGE_PARAM: &str = "LISTING-LISTpg";

pub struct SeLogerSource {
    scrapfly: ScrapflyClient,
    site_url: String,
    listings_per_page: usize,
    id_regex: Regex,
    total_regex: Regex,
    bedrooms_regex: Regex,
}

/// One parsed page of search results.
#[derive(Debug, Default, PartialEq)]
pub struct IndexPage {
    pub listings: Vec<ListingRef>,
    pub total: Option<usize>,
}

impl SeLogerSource {
    pub fn new(scrapfly: ScrapflyClient, site_url: impl Into<String>, listings_per_page: usize) -> Result<Self> {
        Ok(Self {
            scrapfly,
            site_url: site_url.into().trim_end_matches('/').to_string(),
            listings_per_page: listings_per_page.max(1),
            id_regex: compile(r"/(\d+)\.htm")?,
            total_regex: compile(r"(\d[\d\s\u{a0}\u{202f}]*)\s+annonces")?,
            bedrooms_regex: compile(r"(?i)(\d+)\s+chambres?")?,
        })
    }

    /// Search URL for the first result page.
    pub fn search_url(&self, params: &SearchParams) -> Result<Url> {
        search_url(&self.site_url, params)
    }

    pub fn parse_index_page(&self, html: &str) -> Result<IndexPage> {
        let document = Html::parse_document(html);
        let link_selector = selector(LISTING_LINK_SELECTOR)?;
        let title_selector = selector("title")?;

        let mut listings = Vec::new();
        for link in document.select(&link_selector) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let url = self.normalize_link(href);
            if !url.starts_with(&self.site_url) {
                debug!(%url, "Skipping link outside the listing site");
                continue;
            }
            match self.extract_id(&url) {
                Some(id) => listings.push(ListingRef::new(id, url)),
                None => debug!(%url, "Skipping link without a listing id"),
            }
        }

        let total = document
            .select(&title_selector)
            .next()
            .map(|title| title.text().collect::<String>())
            .and_then(|title| self.extract_total(&title));

        Ok(IndexPage { listings, total })
    }

    pub fn parse_detail_page(&self, listing_ref: &ListingRef, html: &str) -> Result<Listing> {
        let document = Html::parse_document(html);
        let script_selector = selector(NEXT_DATA_SELECTOR)?;

        let raw = document
            .select(&script_selector)
            .next()
            .map(|script| script.text().collect::<String>())
            .ok_or_else(|| AppError::parse(format!("No __NEXT_DATA__ script on {}", listing_ref.url)))?;

        let data: NextData = serde_json::from_str(&raw)
            .map_err(|e| AppError::parse(format!("Unexpected listing data on {}: {}", listing_ref.url, e)))?;

        Ok(self.to_listing(listing_ref, data.props.page_props.listing_data.listing.listing_detail))
    }

    fn to_listing(&self, listing_ref: &ListingRef, detail: ListingDetail) -> Listing {
        let features = detail.feature_categories.as_ref().map(flatten_text).unwrap_or_default();

        let mut listing = Listing::new(listing_ref);
        listing.price = detail.listing_price.as_ref().and_then(price_value);
        listing.surface = detail
            .surface
            .as_ref()
            .or(detail.living_area.as_ref())
            .and_then(decimal_value);
        listing.bedrooms = detail
            .bedroom_count
            .as_ref()
            .and_then(decimal_value)
            .and_then(|count| count.trunc().to_u32())
            .or_else(|| {
                self.bedrooms_regex
                    .captures(&features)
                    .and_then(|c| c[1].parse().ok())
            });
        listing.has_garden = garden_status(detail.has_garden, &features);
        listing.location_tags = detail.address.map(Address::into_tags).unwrap_or_default();
        listing.description = detail.descriptive.map(|d| clean_text(&d)).unwrap_or_default();
        listing.additional_info = Some(features).filter(|f| !f.is_empty());
        listing.image_refs = detail
            .media
            .map(|media| media.photos.into_iter().filter_map(|p| p.original_url).collect())
            .unwrap_or_default();
        listing
    }

    fn normalize_link(&self, href: &str) -> String {
        let without_query = href.split('?').next().unwrap_or(href);
        if without_query.starts_with("http") {
            without_query.to_string()
        } else if without_query.starts_with('/') {
            format!("{}{}", self.site_url, without_query)
        } else {
            format!("{}/{}", self.site_url, without_query)
        }
    }

    fn extract_id(&self, url: &str) -> Option<String> {
        self.id_regex.captures(url).map(|c| c[1].to_string())
    }

    fn extract_total(&self, title: &str) -> Option<usize> {
        let captures = self.total_regex.captures(title)?;
        let digits: String = captures[1].chars().filter(char::is_ascii_digit).collect();
        digits.parse().ok()
    }

    fn page_count(&self, total: usize) -> usize {
        total.div_ceil(self.listings_per_page)
    }
}

#[async_trait]
impl ListingSource for SeLogerSource {
    async fn fetch_index(&self, params: &SearchParams) -> Result<Vec<ListingRef>> {
        let start_url = self.search_url(params)?;
        info!(url = %start_url, "Fetching search index");

        let first_page = self.parse_index_page(&self.scrapfly.scrape(start_url.as_str(), true).await?)?;
        let total = first_page.total.unwrap_or_else(|| {
            warn!("Could not determine the total number of listings from the page title");
            0
        });
        let pages = self.page_count(total);
        info!(total, pages, "Search index size");

        let mut listings = first_page.listings;
        for page in 2..=pages {
            let mut page_url = start_url.clone();
            page_url.query_pairs_mut().append_pair(PAGE_PARAM, &page.to_string());
            debug!(page, pages, url = %page_url, "Fetching search index page");

            let html = self.scrapfly.scrape(page_url.as_str(), true).await?;
            listings.extend(self.parse_index_page(&html)?.listings);
        }

        let mut seen = HashSet::new();
        listings.retain(|listing| seen.insert(listing.id.clone()));
        Ok(listings)
    }

    async fn fetch_detail(&self, listing: &ListingRef) -> Result<Listing> {
        debug!(listing_id = %listing.id, url = %listing.url, "Fetching listing detail");
        let html = self.scrapfly.scrape(&listing.url, false).await?;
        self.parse_detail_page(listing, &html)
    }
}

// Shape of the Next.js payload embedded in detail pages. Only the fields we
// read are declared; everything else is ignored.

#[derive(Deserialize)]
struct NextData {
    props: Props,
}

#[derive(Deserialize)]
struct Props {
    #[serde(rename = "pageProps")]
    page_props: PageProps,
}

#[derive(Deserialize)]
struct PageProps {
    #[serde(rename = "listingData")]
    listing_data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    listing: ListingEnvelope,
}

#[derive(Deserialize)]
struct ListingEnvelope {
    #[serde(rename = "listingDetail")]
    listing_detail: ListingDetail,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ListingDetail {
    address: Option<Address>,
    descriptive: Option<String>,
    feature_categories: Option<Value>,
    media: Option<Media>,
    listing_price: Option<Value>,
    surface: Option<Value>,
    living_area: Option<Value>,
    bedroom_count: Option<Value>,
    has_garden: Option<bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Address {
    Text(String),
    Parts(AddressParts),
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct AddressParts {
    city: Option<String>,
    district: Option<String>,
    postal_code: Option<String>,
}

impl Address {
    fn into_tags(self) -> BTreeSet<String> {
        let tags = match self {
            Address::Text(text) => vec![Some(text)],
            Address::Parts(parts) => vec![parts.city, parts.district, parts.postal_code],
        };
        tags.into_iter()
            .flatten()
            .map(|tag| clean_text(&tag))
            .filter(|tag| !tag.is_empty())
            .collect()
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Media {
    photos: Vec<Photo>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Photo {
    original_url: Option<String>,
}

/// Search URL for the first result page on `site_url`, newest listings first.
pub fn search_url(site_url: &str, params: &SearchParams) -> Result<Url> {
    let codes: Vec<Value> = params
        .insee_codes
        .iter()
        .map(|code| {
            code.parse::<u64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(code.clone()))
        })
        .collect();
    let places = json!([{ "inseeCodes": codes }]).to_string();

    let mut pairs = vec![
        ("projects", params.projects.clone()),
        ("types", params.types.clone()),
        ("natures", params.natures.clone()),
        ("places", places),
        ("price", range_param(params.price_min, params.price_max)),
        ("surface", range_param(params.surface_min, params.surface_max)),
    ];
    if let Some(bedrooms) = params.bedrooms.to_query() {
        pairs.push(("bedrooms", bedrooms));
    }
    pairs.push(("sort", "d_dt_crea".to_string()));
    if let Some(commodities) = &params.mandatory_commodities {
        pairs.push(("mandatorycommodities", commodities.clone()));
    }
    pairs.push(("enterprise", "0".to_string()));
    pairs.push(("qsVersion", "1.0".to_string()));
    pairs.push(("m", "search_refine-redirection-search_results".to_string()));

    Url::parse_with_params(&format!("{}/list.htm", site_url.trim_end_matches('/')), &pairs)
        .map_err(|e| AppError::parse(format!("Invalid search URL: {}", e)))
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::parse(format!("Invalid pattern {}: {}", pattern, e)))
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::parse(format!("Invalid selector {}: {:?}", css, e)))
}

fn range_param(min: Option<Decimal>, max: Option<Decimal>) -> String {
    let bound = |value: Option<Decimal>| value.map(|v| v.normalize().to_string()).unwrap_or_else(|| "NaN".to_string());
    format!("{}/{}", bound(min), bound(max))
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// All string leaves of a JSON value, in document order.
fn flatten_text(value: &Value) -> String {
    fn collect<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
        match value {
            Value::String(s) => out.push(s),
            Value::Array(items) => items.iter().for_each(|item| collect(item, out)),
            Value::Object(map) => map.values().for_each(|item| collect(item, out)),
            _ => {}
        }
    }
    let mut parts = Vec::new();
    collect(value, &mut parts);
    clean_text(&parts.join(", "))
}

/// Numbers and numeric strings such as `"112,5 m²"` or `"289 000 €"`.
fn decimal_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
                .collect::<String>()
                .replace(',', ".");
            Decimal::from_str(cleaned.trim_end_matches('.')).ok()
        }
        Value::Object(map) => map.get("value").and_then(decimal_value),
        _ => None,
    }
}

fn price_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Object(map) => map.get("price").or_else(|| map.get("value")).and_then(decimal_value),
        other => decimal_value(other),
    }
}

fn garden_status(explicit: Option<bool>, features: &str) -> GardenStatus {
    match explicit {
        Some(true) => GardenStatus::Yes,
        Some(false) => GardenStatus::No,
        None if features.to_lowercase().contains("jardin") => GardenStatus::Yes,
        None => GardenStatus::Unknown,
    }
}
