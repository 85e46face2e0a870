//! Tests for the selective fetch check and the normalize/join helpers.

use coalescer::catalog::{Item, ItemResult, Price};
use coalescer::{index, is_requested, join, Index, Join, RequestedShape, ShapeParseError};
use serde_json::json;

#[test]
fn test_is_requested_walks_the_tree() {
    let shape = RequestedShape::from_paths(["a.b", "c"]);

    assert!(is_requested(&["a", "b"], &shape));
    assert!(is_requested(&["a"], &shape));
    assert!(is_requested(&["c"], &shape));
    assert!(!is_requested(&["a", "c"], &shape));
    assert!(!is_requested(&["b"], &shape));
    assert!(!is_requested(&["c", "d"], &shape));

    // An empty path asks for nothing in particular
    let empty: &[&str] = &[];
    assert!(is_requested(empty, &shape));
}

#[test]
fn test_nothing_is_requested_from_an_empty_shape() {
    let shape = RequestedShape::new();

    assert!(!is_requested(&["x"], &shape));
    assert!(!shape.is_requested_dotted("results.price"));
}

#[test]
fn test_parsed_selection() {
    let shape: RequestedShape = "{ results { id, price { amount } } results { name } pagination { page } }"
        .parse()
        .unwrap();

    // Repeated fields are merged
    assert!(shape.is_requested_dotted("results.id"));
    assert!(shape.is_requested_dotted("results.name"));
    assert!(shape.is_requested_dotted("results.price.amount"));
    assert!(!shape.is_requested_dotted("results.price.currency"));
    assert!(!shape.is_requested_dotted("pagination.totalPages"));

    let fields: Vec<&str> = shape.field("results").unwrap().fields().collect();
    assert_eq!(fields, ["id", "name", "price"]);

    assert_eq!(
        shape,
        RequestedShape::from_paths(["results.id", "results.name", "results.price.amount", "pagination.page"])
    );
    assert_eq!(
        shape.to_string(),
        "{ pagination { page } results { id name price { amount } } }"
    );
}

#[test]
fn test_selection_errors() {
    assert_eq!(
        "results { id".parse::<RequestedShape>(),
        Err(ShapeParseError::UnexpectedEnd {
            expected: "closing brace"
        })
    );
    assert_eq!(
        "results { }".parse::<RequestedShape>(),
        Err(ShapeParseError::EmptySelection {
            field: String::from("results")
        })
    );
    assert_eq!(
        "results }".parse::<RequestedShape>(),
        Err(ShapeParseError::UnexpectedChar { found: '}', offset: 8 })
    );
    assert_eq!(
        "{ id } extra".parse::<RequestedShape>(),
        Err(ShapeParseError::UnexpectedChar { found: 'e', offset: 7 })
    );
}

#[test]
fn test_shape_from_json() {
    let shape: RequestedShape = serde_json::from_value(json!({
        "results": { "price": {} },
    }))
    .unwrap();

    assert!(shape.is_requested(&["results", "price"]));
    assert!(shape.field("results").unwrap().field("price").unwrap().is_leaf());
}

fn item(id: &str, name: &str) -> Item {
    Item {
        id: String::from(id),
        name: String::from(name),
    }
}

fn price(id: &str, amount: u64) -> Price {
    Price {
        id: String::from(id),
        currency: String::from("EUR"),
        amount,
    }
}

fn composite((item, price): (Item, Option<&Price>)) -> ItemResult {
    ItemResult {
        id: item.id,
        name: Some(item.name),
        price: price.cloned(),
    }
}

#[test]
fn test_join_gap_omits_the_field() {
    let prices: Index<String, Price> = index(Vec::new());

    let joined: Vec<ItemResult> = join(vec![item("1", "x")], &prices)
        .into_iter()
        .map(composite)
        .collect();

    assert_eq!(serde_json::to_value(&joined).unwrap(), json!([{ "id": "1", "name": "x" }]));
}

#[test]
fn test_join_attaches_the_match() {
    let prices = index(vec![price("1", 5)]);

    let joined: Vec<ItemResult> = join(vec![item("1", "x")], &prices)
        .into_iter()
        .map(composite)
        .collect();

    assert_eq!(
        serde_json::to_value(&joined).unwrap(),
        json!([{
            "id": "1",
            "name": "x",
            "price": { "id": "1", "currency": "EUR", "amount": 5 },
        }])
    );
}

#[test]
fn test_empty_inputs() {
    let empty: Index<String, Item> = index(Vec::new());
    assert!(empty.is_empty());

    let prices = index(vec![price("1", 5)]);
    assert!(join(Vec::<Item>::new(), &prices).is_empty());
}

#[test]
fn test_index_last_write_wins() {
    let prices = index(vec![price("1", 5), price("2", 6), price("1", 7)]);

    assert_eq!(prices.len(), 2);
    assert_eq!(prices.get("1").map(|price| price.amount), Some(7));
    assert!(prices.contains_key("2"));
    assert!(!prices.contains_key("3"));
}

#[test]
fn test_join_keeps_base_order_and_length() {
    let items = index(vec![item("2", "two"), item("1", "one")]);
    let prices = index(vec![price("3", 30), price("1", 10)]);
    let base = vec!["3", "1", "4", "1", "2"].into_iter().map(String::from);

    let rows = Join::new(base).attach(&items).attach(&prices).map(|((id, item), price)| {
        (
            id,
            item.map(|item| item.name.as_str()),
            price.map(|price| price.amount),
        )
    });

    assert_eq!(
        rows,
        [
            (String::from("3"), None, Some(30)),
            (String::from("1"), Some("one"), Some(10)),
            (String::from("4"), None, None),
            (String::from("1"), Some("one"), Some(10)),
            (String::from("2"), Some("two"), None),
        ]
    );
}

#[test]
fn test_attach_if_skips_the_side() {
    let prices = index(vec![price("1", 5)]);

    let rows = Join::new(vec![String::from("1")])
        .attach_if(false, &prices)
        .into_rows();

    assert_eq!(rows, [(String::from("1"), None)]);
}
