//! End-to-end tests of the catalog resolvers: how many store requests each
//! operation makes, and what comes back.

use coalescer::catalog::{
    all_items, search_items, search_items_many, CatalogConfig, CatalogError, CatalogLoaders, CatalogServices,
    ResolveError, SearchArgs, StoreLatency,
};
use coalescer::{LoadError, RequestedShape};
use futures::{executor, future};
use serde_json::json;

fn catalog() -> (CatalogServices, CatalogLoaders) {
    let config = CatalogConfig {
        latency: StoreLatency::none(),
        ..CatalogConfig::default()
    };

    let services = config.services();
    let loaders = CatalogLoaders::new(&services, &config.loaders);
    (services, loaders)
}

fn page(page: u32, page_size: u32) -> SearchArgs {
    SearchArgs {
        search_term: None,
        page,
        page_size,
    }
}

fn shape(selection: &str) -> RequestedShape {
    selection.parse().unwrap()
}

#[test]
fn test_identical_searches_share_a_call() {
    let (services, loaders) = catalog();

    let first = loaders.search.load(page(0, 5));
    let second = loaders.search.load(page(0, 5));
    loaders.search.flush();

    let (first, second) = executor::block_on(future::try_join(first, second)).unwrap();

    assert_eq!(services.search.calls(), 1);
    assert_eq!(first, second);
    assert_eq!(first.pagination.total_pages, 40);
    assert_eq!(first.pagination.total_elements, 200);
    assert_eq!(first.ids, ["0", "1", "2", "3", "4"]);
}

#[test]
fn test_unrequested_prices_are_never_fetched() {
    let (services, loaders) = catalog();
    let shape = shape("{ results { id name } pagination { totalPages } }");

    let found = executor::block_on(search_items(&loaders, page(1, 5), &shape)).unwrap();

    assert_eq!(services.search.calls(), 1);
    assert_eq!(services.items.calls(), 1);
    assert_eq!(services.prices.calls(), 0);

    let ids: Vec<&str> = found.results.iter().map(|result| result.id.as_str()).collect();
    assert_eq!(ids, ["5", "6", "7", "8", "9"]);
    assert!(found.results.iter().all(|result| result.price.is_none()));
    assert_eq!(found.results[0].name.as_deref(), Some("Item 5"));
}

#[test]
fn test_unrequested_names_are_never_fetched() {
    let (services, loaders) = catalog();
    let shape = shape("results { id price { currency amount } }");

    let found = executor::block_on(search_items(&loaders, page(0, 3), &shape)).unwrap();

    assert_eq!(services.items.calls(), 0);
    assert_eq!(services.prices.calls(), 1);

    for result in &found.results {
        assert_eq!(result.name, None);

        let price = result.price.as_ref().unwrap();
        assert_eq!(price.id, result.id);
        assert_eq!(price.currency, "EUR");
    }
}

#[test]
fn test_composite_results_omit_absent_fields() {
    let (_services, loaders) = catalog();
    let shape = shape("results { id } pagination { page pageSize totalPages totalElements }");

    let found = executor::block_on(search_items(&loaders, page(39, 5), &shape)).unwrap();

    assert_eq!(
        serde_json::to_value(&found).unwrap(),
        json!({
            "pagination": {
                "page": 39,
                "pageSize": 5,
                "totalPages": 40,
                "totalElements": 200,
            },
            "results": [
                { "id": "195" },
                { "id": "196" },
                { "id": "197" },
                { "id": "198" },
                { "id": "199" },
            ],
        })
    );
}

#[test]
fn test_search_term() {
    let (_services, loaders) = catalog();
    let args = SearchArgs {
        search_term: Some(String::from("Item 19")),
        page: 0,
        page_size: 4,
    };

    let found = executor::block_on(search_items(&loaders, args, &shape("results { name }"))).unwrap();

    // "Item 19" and "Item 190" through "Item 199"
    assert_eq!(found.pagination.total_elements, 11);
    assert_eq!(found.pagination.total_pages, 3);

    let names: Vec<&str> = found
        .results
        .iter()
        .filter_map(|result| result.name.as_deref())
        .collect();
    assert_eq!(names, ["Item 19", "Item 190", "Item 191", "Item 192"]);
}

#[test]
fn test_many_searches_coalesce() {
    let (services, loaders) = catalog();
    let shape = shape("results { name price { amount } }");

    let results = executor::block_on(search_items_many(
        &loaders,
        vec![page(0, 5), page(0, 10), page(0, 5)],
        &shape,
    ));

    // Two distinct searches, and one whole-batch request each for the
    // overlapping identifiers they found
    assert_eq!(services.search.calls(), 2);
    assert_eq!(services.items.calls(), 1);
    assert_eq!(services.prices.calls(), 1);

    let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(results[0], results[2]);
    assert_eq!(results[1].results.len(), 10);
    assert_eq!(results[0].results[..], results[1].results[..5]);
}

#[test]
fn test_failed_search_is_local() {
    let (_services, loaders) = catalog();

    let results = executor::block_on(search_items_many(
        &loaders,
        vec![page(0, 0), page(2, 50)],
        &shape("results { name }"),
    ));

    assert_eq!(
        results[0],
        Err(ResolveError::Search(LoadError::Fetch(CatalogError::InvalidPageSize)))
    );

    let found = results[1].as_ref().unwrap();
    assert_eq!(found.pagination.total_pages, 4);
    assert_eq!(found.results[0].name.as_deref(), Some("Item 100"));
}

#[test]
fn test_all_items_without_prices() {
    let (services, loaders) = catalog();

    let items = executor::block_on(all_items(&services, &loaders, &shape("id name"))).unwrap();

    assert_eq!(items.len(), 200);
    assert_eq!(services.prices.calls(), 0);
    assert!(items.iter().all(|item| item.name.is_some() && item.price.is_none()));
}

#[test]
fn test_all_items_with_prices() {
    let (services, loaders) = catalog();

    let items = executor::block_on(all_items(&services, &loaders, &shape("id price { amount }"))).unwrap();

    assert_eq!(items.len(), 200);
    assert_eq!(services.prices.calls(), 1);

    for (position, item) in items.iter().enumerate() {
        assert_eq!(item.id, position.to_string());
        assert_eq!(item.price.as_ref().map(|price| price.id.as_str()), Some(item.id.as_str()));
    }
}

#[test]
fn test_config_from_json() {
    let config: CatalogConfig = serde_json::from_value(json!({
        "size": 10,
        "latency": { "items_ms": 0 },
        "loaders": { "search": { "grouping": "whole", "deadline_ms": 1000 } },
    }))
    .unwrap();

    assert_eq!(config.size, 10);
    assert_eq!(config.latency.items_ms, 0);
    assert_eq!(config.latency.search_ms, 200);
    assert_eq!(config.loaders.search.deadline_ms, Some(1000));
    assert_eq!(config.loaders.items, CatalogConfig::default().loaders.items);

    let unknown = serde_json::from_value::<CatalogConfig>(json!({ "sizes": 10 }));
    assert!(unknown.is_err());
}
