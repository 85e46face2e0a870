//! Search-then-enrich resolvers.
//!
//! Every resolver works in phases. Each phase issues all of its loads, then
//! flushes the loaders it used, then awaits the results. Loads issued in the
//! same phase share a batch, so identical searches and repeated identifiers
//! cost a single backend call.

use futures::future::{join_all, try_join_all};
use tracing::{debug, instrument};

use super::{
    CatalogError, CatalogLoad, CatalogLoaders, CatalogServices, Item, ItemResult, Price, ResolveError, SearchArgs,
    SearchItems, SearchPage,
};
use crate::{
    error::LoadError,
    join::{index, Join},
    shape::RequestedShape,
};

const NAME: &[&str] = &["results", "name"];
const PRICE: &[&str] = &["results", "price"];

/// Which optional stores a search needs to hit.
#[derive(Debug, Clone, Copy)]
struct Plan {
    items: bool,
    prices: bool,
}

impl Plan {
    fn new(shape: &RequestedShape) -> Self {
        let plan = Self {
            items: shape.is_requested(NAME),
            prices: shape.is_requested(PRICE),
        };

        debug!(items = plan.items, prices = plan.prices, "planned search enrichment");
        plan
    }
}

// The enrichment loads for one page of search results
struct Enrichment {
    items: Vec<CatalogLoad<String, Option<Item>>>,
    prices: Vec<CatalogLoad<String, Price>>,
}

impl Enrichment {
    fn issue(loaders: &CatalogLoaders, plan: Plan, page: &SearchPage) -> Self {
        let ids = || page.ids.iter().cloned();

        Self {
            items: if plan.items { loaders.items.load_many(ids()) } else { Vec::new() },
            prices: if plan.prices { loaders.prices.load_many(ids()) } else { Vec::new() },
        }
    }
}

type Loaded<T> = Vec<Result<T, LoadError<CatalogError>>>;

fn compose(
    plan: Plan,
    page: SearchPage,
    items: Loaded<Option<Item>>,
    prices: Loaded<Price>,
) -> Result<SearchItems, ResolveError> {
    let items: Vec<Option<Item>> = items
        .into_iter()
        .collect::<Result<_, _>>()
        .map_err(ResolveError::Items)?;
    let prices: Vec<Price> = prices
        .into_iter()
        .collect::<Result<_, _>>()
        .map_err(ResolveError::Prices)?;

    let items = index(items.into_iter().flatten());
    let prices = index(prices);

    let results = Join::new(page.ids)
        .attach_if(plan.items, &items)
        .attach_if(plan.prices, &prices)
        .map(|((id, item), price)| ItemResult {
            id,
            name: item.map(|item| item.name.clone()),
            price: price.cloned(),
        });

    Ok(SearchItems {
        pagination: page.pagination,
        results,
    })
}

/// Run one search, then fetch item names (if `results.name` was requested)
/// and prices (if `results.price` was requested) for the identifiers it
/// found.
///
/// The result rows are in search order, with exactly one row per identifier.
#[instrument(skip(loaders, shape), fields(page = args.page, page_size = args.page_size))]
pub async fn search_items(
    loaders: &CatalogLoaders,
    args: SearchArgs,
    shape: &RequestedShape,
) -> Result<SearchItems, ResolveError> {
    let plan = Plan::new(shape);

    let search = loaders.search.load(args);
    loaders.search.flush();
    let page = search.await.map_err(ResolveError::Search)?;

    let enrichment = Enrichment::issue(loaders, plan, &page);
    loaders.items.flush();
    loaders.prices.flush();

    let (items, prices) = futures::join!(join_all(enrichment.items), join_all(enrichment.prices));
    compose(plan, page, items, prices)
}

/// Resolve several searches as part of one operation, as a query with
/// several aliased search fields would. All searches are issued into the same
/// batch, and so are all of the enrichment loads that follow, so two
/// requests for the same page cost one search, and an identifier found by
/// several searches is fetched once.
///
/// Every request succeeds or fails on its own; the results are in request
/// order.
#[instrument(skip_all, fields(requests = requests.len()))]
pub async fn search_items_many(
    loaders: &CatalogLoaders,
    requests: Vec<SearchArgs>,
    shape: &RequestedShape,
) -> Vec<Result<SearchItems, ResolveError>> {
    let plan = Plan::new(shape);

    let searches = loaders.search.load_many(requests);
    loaders.search.flush();
    let pages = join_all(searches).await;

    let enrichments: Vec<Option<Enrichment>> = pages
        .iter()
        .map(|page| page.as_ref().ok().map(|page| Enrichment::issue(loaders, plan, page)))
        .collect();
    loaders.items.flush();
    loaders.prices.flush();

    let loaded = join_all(enrichments.into_iter().map(|enrichment| async move {
        match enrichment {
            Some(Enrichment { items, prices }) => Some(futures::join!(join_all(items), join_all(prices))),
            None => None,
        }
    }))
    .await;

    pages
        .into_iter()
        .zip(loaded)
        .map(|(page, loaded)| {
            let page = page.map_err(ResolveError::Search)?;
            let (items, prices) = loaded.unwrap_or_default();
            compose(plan, page, items, prices)
        })
        .collect()
}

/// List the whole catalog. Item details come straight from the item store,
/// which is cheap; prices go through the price loader, and only if `price`
/// was requested.
#[instrument(skip_all)]
pub async fn all_items(
    services: &CatalogServices,
    loaders: &CatalogLoaders,
    shape: &RequestedShape,
) -> Result<Vec<ItemResult>, ResolveError> {
    let items = services.items.all().await;

    if !shape.is_requested(&["price"]) {
        return Ok(items.into_iter().map(ItemResult::from).collect());
    }

    let prices = loaders.prices.load_many(items.iter().map(|item| item.id.clone()));
    loaders.prices.flush();
    let prices = index(try_join_all(prices).await.map_err(ResolveError::Prices)?);

    Ok(Join::new(items).attach(&prices).map(|(item, price)| ItemResult {
        price: price.cloned(),
        ..ItemResult::from(item)
    }))
}
