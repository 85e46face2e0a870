//! A small product catalog, wired through the coalescing engine.
//!
//! Three slow stores (search, item details, prices) sit behind per-operation
//! [`CatalogLoaders`]. The resolvers in this module run a search, then fetch
//! item details and prices only for the fields the caller asked for, and
//! join everything back together in search order.
//!
//! ```
//! use coalescer::catalog::{search_items, CatalogConfig, CatalogLoaders, SearchArgs, StoreLatency};
//! use coalescer::RequestedShape;
//! use futures::executor::block_on;
//!
//! let config = CatalogConfig {
//!     latency: StoreLatency::none(),
//!     ..CatalogConfig::default()
//! };
//! let services = config.services();
//! let loaders = CatalogLoaders::new(&services, &config.loaders);
//!
//! let shape: RequestedShape = "results { id name } pagination { totalPages }".parse().unwrap();
//! let args = SearchArgs { search_term: None, page: 0, page_size: 5 };
//!
//! let found = block_on(search_items(&loaders, args, &shape)).unwrap();
//!
//! assert_eq!(found.pagination.total_pages, 40);
//! assert_eq!(found.results[1].name.as_deref(), Some("Item 1"));
//! assert!(found.results[1].price.is_none());
//! ```

mod resolver;
mod store;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    batch::{BatchLoader, LoadFuture},
    config::LoaderSettings,
    data::{IntoValuesError, KeySet, KeyedEntry, OnDuplicate, ValueSet},
    error::LoadError,
    join::index,
};

pub use resolver::{all_items, search_items, search_items_many};
pub use store::{CatalogServices, ItemService, PriceService, SearchService, StoreLatency};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
}

impl KeyedEntry for Item {
    type Key = str;

    fn get_key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    pub currency: String,

    /// In minor units of `currency`
    pub amount: u64,
}

impl KeyedEntry for Price {
    type Key = str;

    fn get_key(&self) -> &str {
        &self.id
    }
}

/// The arguments of a search. A missing search term matches every item.
///
/// These are the lookup keys of the search loader: two searches with the
/// same arguments in one batch share a single call to the search store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: usize,
    pub total_elements: usize,
}

/// One page of search results: the matching identifiers, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub ids: Vec<String>,
    pub pagination: Pagination,
}

/// A composite result row. Fields that weren't requested, or that a store
/// had nothing for, are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
}

impl From<Item> for ItemResult {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            name: Some(item.name),
            price: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchItems {
    pub pagination: Pagination,
    pub results: Vec<ItemResult>,
}

/// A failure inside one of the catalog's batch functions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("page size must be at least 1")]
    InvalidPageSize,

    #[error(transparent)]
    Values(#[from] IntoValuesError),
}

/// Which stage of a resolver failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("search failed")]
    Search(#[source] LoadError<CatalogError>),

    #[error("item lookup failed")]
    Items(#[source] LoadError<CatalogError>),

    #[error("price lookup failed")]
    Prices(#[source] LoadError<CatalogError>),
}

/// Loader settings for each of the catalog's loaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogLoaderSettings {
    pub search: LoaderSettings,
    pub items: LoaderSettings,
    pub prices: LoaderSettings,
}

impl Default for CatalogLoaderSettings {
    fn default() -> Self {
        Self {
            search: LoaderSettings::default(),
            items: LoaderSettings::whole(),
            prices: LoaderSettings::whole(),
        }
    }
}

/// Everything needed to stand up a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    /// The number of items in the catalog
    pub size: usize,
    pub latency: StoreLatency,
    pub loaders: CatalogLoaderSettings,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            size: 200,
            latency: StoreLatency::default(),
            loaders: CatalogLoaderSettings::default(),
        }
    }
}

impl CatalogConfig {
    pub fn services(&self) -> CatalogServices {
        CatalogServices::new(self.size, self.latency)
    }
}

pub type CatalogBatch<V> = BoxFuture<'static, Result<ValueSet<V>, CatalogError>>;
pub type CatalogBatcher<Arg, V> = Box<dyn Fn(KeySet<Arg>) -> CatalogBatch<V> + Send + Sync>;
pub type CatalogLoader<Arg, V> = BatchLoader<Arg, V, CatalogError, CatalogBatch<V>, CatalogBatcher<Arg, V>>;
pub type CatalogLoad<Arg, V> = LoadFuture<Arg, V, CatalogError, CatalogBatch<V>, CatalogBatcher<Arg, V>>;

/// The loaders of a single top-level operation. Build a fresh set for every
/// operation; loaders never share batches with each other.
pub struct CatalogLoaders {
    pub search: CatalogLoader<SearchArgs, SearchPage>,

    /// Unknown identifiers resolve to `None`.
    pub items: CatalogLoader<String, Option<Item>>,
    pub prices: CatalogLoader<String, Price>,
}

impl CatalogLoaders {
    pub fn new(services: &CatalogServices, settings: &CatalogLoaderSettings) -> Self {
        Self {
            search: BatchLoader::new(settings.search.rules(search_batcher(&services.search))),
            items: BatchLoader::new(settings.items.rules(item_batcher(&services.items))),
            prices: BatchLoader::new(settings.prices.rules(price_batcher(&services.prices))),
        }
    }
}

fn search_batcher(service: &SearchService) -> CatalogBatcher<SearchArgs, SearchPage> {
    let service = service.clone();

    Box::new(move |keys: KeySet<SearchArgs>| -> CatalogBatch<SearchPage> {
        let service = service.clone();

        async move {
            let searches = keys.keys().map(|args| service.search(args));
            let pages = futures::future::try_join_all(searches).await?;
            Ok::<_, CatalogError>(keys.values_from_seq(pages)?)
        }
        .boxed()
    })
}

fn item_batcher(service: &ItemService) -> CatalogBatcher<String, Option<Item>> {
    let service = service.clone();

    Box::new(move |keys: KeySet<String>| -> CatalogBatch<Option<Item>> {
        let service = service.clone();

        async move {
            let ids: Vec<&String> = keys.keys().collect();
            let found = index(service.get_by_ids(&ids).await);
            Ok(keys.into_values(|id| found.get(id.as_str()).cloned()))
        }
        .boxed()
    })
}

fn price_batcher(service: &PriceService) -> CatalogBatcher<String, Price> {
    let service = service.clone();

    Box::new(move |keys: KeySet<String>| -> CatalogBatch<Price> {
        let service = service.clone();

        async move {
            let ids: Vec<&String> = keys.keys().collect();
            let prices = service.get_prices(&ids).await;
            Ok::<_, CatalogError>(keys.values_from_iter(OnDuplicate::Error, prices)?)
        }
        .boxed()
    })
}
