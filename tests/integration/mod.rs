// Integration tests for the SeLoger watcher
// These tests drive whole runs through the public API, with in-memory
// collaborators or HTTP servers standing in for the external services.

pub mod http_tests;
pub mod pipeline_tests;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use seloger_watcher::models::{
    BedroomFilter, GardenStatus, InterestStatement, Judgment, Listing, ListingId, ListingRef, RangeFilter,
    SearchCriteria, SearchParams,
};
use seloger_watcher::plugins::{ListingSource, Notification, Notifier, RelevanceClassifier};
use seloger_watcher::{AppError, ListingStore, Pipeline, PipelineContext, Result};

pub fn listing_ref(id: &str) -> ListingRef {
    ListingRef::new(id, format!("https://www.seloger.com/annonces/achat/maison/angers-49/{}.htm", id))
}

pub fn listing(id: &str, price: i64) -> Listing {
    let mut listing = Listing::new(&listing_ref(id));
    listing.price = Some(Decimal::from(price));
    listing.surface = Some(Decimal::from(95));
    listing.bedrooms = Some(3);
    listing.has_garden = GardenStatus::Yes;
    listing.description = format!("Maison {} proche du tramway", id);
    listing
}

/// Price between 100k and 300k, anything else accepted.
pub fn test_criteria() -> SearchCriteria {
    SearchCriteria {
        price: RangeFilter::new(Some(Decimal::from(100_000)), Some(Decimal::from(300_000))),
        interesting: vec![
            InterestStatement::desired("Proche du tramway"),
            InterestStatement::excluded("de travaux"),
        ],
        ..Default::default()
    }
}

pub fn test_params() -> SearchParams {
    SearchParams {
        insee_codes: vec!["490007".to_string()],
        projects: "2".to_string(),
        types: "2,1".to_string(),
        natures: "1,2,4".to_string(),
        mandatory_commodities: None,
        price_min: Some(Decimal::from(100_000)),
        price_max: Some(Decimal::from(300_000)),
        surface_min: None,
        surface_max: None,
        bedrooms: BedroomFilter::Any,
    }
}

/// Serves a fixed index; listed ids in `failing` fail their detail fetch.
/// With `repeated`, every listing shows up twice in the index.
#[derive(Default)]
pub struct FakeSource {
    pub listings: Vec<Listing>,
    pub failing: HashSet<String>,
    pub repeated: bool,
    pub detail_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(listings: Vec<Listing>) -> Self {
        Self {
            listings,
            ..Default::default()
        }
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }
}

#[async_trait]
impl ListingSource for FakeSource {
    async fn fetch_index(&self, _params: &SearchParams) -> Result<Vec<ListingRef>> {
        let copies = if self.repeated { 2 } else { 1 };
        Ok((0..copies)
            .flat_map(|_| self.listings.iter().map(|l| listing_ref(l.id.as_str())))
            .collect())
    }

    async fn fetch_detail(&self, listing: &ListingRef) -> Result<Listing> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(listing.id.as_str()) {
            return Err(AppError::Scraping {
                url: listing.url.clone(),
                message: "upstream responded with status 403".to_string(),
            });
        }
        self.listings
            .iter()
            .find(|l| l.id == listing.id)
            .cloned()
            .ok_or_else(|| AppError::parse(format!("no detail for {}", listing.id)))
    }
}

/// Judges every listing relevant unless its id is in `irrelevant`.
#[derive(Default)]
pub struct FakeClassifier {
    pub irrelevant: HashSet<String>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl RelevanceClassifier for FakeClassifier {
    async fn judge(&self, listing: &Listing, _criteria: &[InterestStatement]) -> Result<Judgment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.irrelevant.contains(listing.id.as_str()) {
            return Ok(Judgment::irrelevant());
        }
        Ok(Judgment {
            relevant: true,
            title: Some(format!("Maison {}", listing.id)),
            summary: Some("**Localisation**\n- Angers".to_string()),
        })
    }
}

/// Records every notification; answers with `accept`.
pub struct FakeNotifier {
    pub sent: StdMutex<Vec<ListingId>>,
    pub accept: bool,
}

impl Default for FakeNotifier {
    fn default() -> Self {
        Self {
            sent: StdMutex::new(Vec::new()),
            accept: true,
        }
    }
}

impl FakeNotifier {
    pub fn sent(&self) -> Vec<ListingId> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, notification: &Notification) -> Result<bool> {
        self.sent.lock().unwrap().push(notification.listing_id.clone());
        Ok(self.accept)
    }
}

/// Collaborators kept alongside the pipeline so tests can inspect them afterwards.
pub struct Harness {
    pub source: Arc<FakeSource>,
    pub classifier: Arc<FakeClassifier>,
    pub notifier: Arc<FakeNotifier>,
}

impl Harness {
    pub fn new(source: FakeSource) -> Self {
        Self {
            source: Arc::new(source),
            classifier: Arc::new(FakeClassifier::default()),
            notifier: Arc::new(FakeNotifier::default()),
        }
    }

    pub fn pipeline(&self, store: ListingStore) -> Pipeline {
        let ctx = PipelineContext {
            source: self.source.clone(),
            classifier: self.classifier.clone(),
            notifier: self.notifier.clone(),
            images: None,
        };
        Pipeline::new(ctx, store, test_criteria(), test_params(), 4)
    }

    pub fn classifier_calls(&self) -> usize {
        self.classifier.calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.source.detail_calls.load(Ordering::SeqCst)
    }
}

pub fn open_store(path: &Path) -> ListingStore {
    ListingStore::open(path).expect("store should open")
}

pub fn status_of(store: &ListingStore, id: &str) -> Option<String> {
    store.status(&ListingId::new(id)).map(|s| s.to_string())
}

pub fn ids(raw: &[&str]) -> Vec<ListingId> {
    raw.iter().map(|id| ListingId::new(*id)).collect()
}

pub fn counts(store: &ListingStore) -> HashMap<String, usize> {
    store
        .summary()
        .into_iter()
        .map(|(status, count)| (status.to_string(), count))
        .collect()
}
