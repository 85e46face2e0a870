//! In-memory catalog stores with artificial latency, standing in for slow
//! backing services.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_timer::Delay;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CatalogError, Item, Pagination, Price, SearchArgs, SearchPage};

/// How long each store takes to answer, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreLatency {
    pub search_ms: u64,
    pub items_ms: u64,
    pub prices_ms: u64,
}

impl Default for StoreLatency {
    fn default() -> Self {
        Self {
            search_ms: 200,
            items_ms: 500,
            prices_ms: 200,
        }
    }
}

impl StoreLatency {
    /// No artificial latency at all.
    pub fn none() -> Self {
        Self {
            search_ms: 0,
            items_ms: 0,
            prices_ms: 0,
        }
    }
}

/// Counts the requests a store has received. Clones of a store share their
/// counter.
#[derive(Debug, Clone, Default)]
struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

async fn respond_after<T>(store: &'static str, millis: u64, value: T) -> T {
    if millis > 0 {
        Delay::new(Duration::from_millis(millis)).await;
    }
    debug!(store, latency_ms = millis, "store responded");
    value
}

fn catalog_items(size: usize) -> Arc<[Item]> {
    (0..size)
        .map(|i| Item {
            id: i.to_string(),
            name: format!("Item {}", i),
        })
        .collect()
}

/// Pages through the identifiers of catalog items, optionally filtered by a
/// search term matched against item names.
#[derive(Debug, Clone)]
pub struct SearchService {
    items: Arc<[Item]>,
    latency_ms: u64,
    calls: CallCounter,
}

impl SearchService {
    /// The number of searches this store has received.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub async fn search(&self, args: &SearchArgs) -> Result<SearchPage, CatalogError> {
        self.calls.record();

        if args.page_size == 0 {
            return Err(CatalogError::InvalidPageSize);
        }

        let term = args.search_term.as_deref().unwrap_or("").to_lowercase();
        let matching: Vec<&Item> = self
            .items
            .iter()
            .filter(|item| term.is_empty() || item.name.to_lowercase().contains(&term))
            .collect();

        let total_elements = matching.len();
        let page_size = args.page_size as usize;
        let ids = matching
            .iter()
            .skip((args.page as usize).saturating_mul(page_size))
            .take(page_size)
            .map(|item| item.id.clone())
            .collect();

        let page = SearchPage {
            ids,
            pagination: Pagination {
                page: args.page,
                page_size: args.page_size,
                total_pages: total_pages(total_elements, page_size),
                total_elements,
            },
        };

        Ok(respond_after("search", self.latency_ms, page).await)
    }
}

pub(crate) fn total_pages(total_elements: usize, page_size: usize) -> usize {
    total_elements.div_ceil(page_size)
}

/// Item details, looked up by identifier.
#[derive(Debug, Clone)]
pub struct ItemService {
    items: Arc<[Item]>,
    latency_ms: u64,
    calls: CallCounter,
}

impl ItemService {
    /// The number of requests this store has received, including
    /// [`all`][ItemService::all].
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    fn find(&self, id: &str) -> Option<&Item> {
        // Identifiers are positions in the catalog
        id.parse::<usize>()
            .ok()
            .and_then(|position| self.items.get(position))
            .filter(|item| item.id == id)
    }

    /// The items with the given identifiers. Unknown identifiers are skipped,
    /// so the result may be shorter than `ids`.
    pub async fn get_by_ids<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Item> {
        self.calls.record();
        let items = ids
            .iter()
            .filter_map(|id| self.find(id.as_ref()))
            .cloned()
            .collect();

        respond_after("items", self.latency_ms, items).await
    }

    /// Every item in the catalog. This one is cheap.
    pub async fn all(&self) -> Vec<Item> {
        self.calls.record();
        respond_after("items", 0, self.items.to_vec()).await
    }
}

/// Prices, looked up by item identifier. Every identifier has a price.
#[derive(Debug, Clone)]
pub struct PriceService {
    latency_ms: u64,
    calls: CallCounter,
}

impl PriceService {
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub async fn get_prices<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Price> {
        self.calls.record();
        let prices = ids.iter().map(|id| price_of(id.as_ref())).collect();
        respond_after("prices", self.latency_ms, prices).await
    }
}

// Deterministic stand-in for a real price feed.
fn price_of(id: &str) -> Price {
    let cents = id
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)))
        % 10_000;

    Price {
        id: id.to_owned(),
        currency: String::from("EUR"),
        amount: cents,
    }
}

/// The three stores of the catalog, sharing one set of items.
#[derive(Debug, Clone)]
pub struct CatalogServices {
    pub search: SearchService,
    pub items: ItemService,
    pub prices: PriceService,
}

impl CatalogServices {
    pub fn new(size: usize, latency: StoreLatency) -> Self {
        let items = catalog_items(size);

        Self {
            search: SearchService {
                items: Arc::clone(&items),
                latency_ms: latency.search_ms,
                calls: CallCounter::default(),
            },
            items: ItemService {
                items,
                latency_ms: latency.items_ms,
                calls: CallCounter::default(),
            },
            prices: PriceService {
                latency_ms: latency.prices_ms,
                calls: CallCounter::default(),
            },
        }
    }
}
