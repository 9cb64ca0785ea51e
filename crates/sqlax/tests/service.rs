mod common;

use serde::{Deserialize, Serialize};
use sqlax::{Conditions, DatabaseError, DatabaseValue, Fields, Record, Service};

use common::{create_schema, manager, sqlite_file_url};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    customer: String,
    total: f64,
    status: String,
}

impl Record for Order {
    fn table_name() -> &'static str {
        "orders"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Product {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    sku: String,
    name: String,
    stock: i64,
}

impl Record for Product {
    fn table_name() -> &'static str {
        "products"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    body: Option<String>,
}

impl Record for Note {
    fn table_name() -> &'static str {
        "notes"
    }
}

fn order(customer: &str, total: f64, status: &str) -> Order {
    Order {
        id: None,
        customer: customer.to_string(),
        total,
        status: status.to_string(),
    }
}

fn product(sku: &str, name: &str, stock: i64) -> Product {
    Product {
        id: None,
        sku: sku.to_string(),
        name: name.to_string(),
        stock,
    }
}

async fn service(dir: &tempfile::TempDir) -> Service {
    let manager = manager(vec![sqlite_file_url(dir.path(), "shop.db")]);
    create_schema(&manager).await;
    Service::new(manager)
}

#[tokio::test]
async fn test_add_returns_stored_fields_with_generated_id() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir).await;

    let stored = service.add(&order("ada", 12.5, "open")).await.unwrap();
    assert_eq!(stored["id"].as_i64(), Some(1));
    assert_eq!(stored["customer"], DatabaseValue::from("ada"));

    let all = service
        .add_all(&[order("grace", 3.0, "open"), order("linus", 7.25, "shipped")])
        .await
        .unwrap();
    let ids: Vec<_> = all.iter().map(|f| f["id"].as_i64()).collect();
    assert_eq!(ids, vec![Some(2), Some(3)]);
}

#[tokio::test]
async fn test_null_columns_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir).await;
    service
        .execute(|session| {
            Box::pin(async move { session.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)", &[]).await })
        })
        .await
        .unwrap();

    let stored = service.add(&Note { id: None, body: None }).await.unwrap();
    assert_eq!(stored["id"].as_i64(), Some(1));
    assert!(stored["body"].is_null());
    service
        .add(&Note {
            id: None,
            body: Some("remember".to_string()),
        })
        .await
        .unwrap();

    let notes: Vec<Note> = service.find(Conditions::new()).await.unwrap();
    assert_eq!(
        notes,
        vec![
            Note { id: Some(1), body: None },
            Note {
                id: Some(2),
                body: Some("remember".to_string())
            },
        ]
    );

    let blank: Vec<Note> = service.find(Conditions::new().is_null("body")).await.unwrap();
    assert_eq!(blank.len(), 1);
    assert_eq!(blank[0].id, Some(1));
}

#[tokio::test]
async fn test_find_variants() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir).await;
    service
        .add_all(&[
            order("ada", 12.5, "open"),
            order("grace", 3.0, "open"),
            order("linus", 7.25, "shipped"),
        ])
        .await
        .unwrap();

    let open: Vec<Order> = service.find(Conditions::new().eq("status", "open")).await.unwrap();
    assert_eq!(open.len(), 2);

    let large: Vec<Order> = service.find(Conditions::new().gt("total", 5.0)).await.unwrap();
    let mut customers: Vec<_> = large.into_iter().map(|o| o.customer).collect();
    customers.sort();
    assert_eq!(customers, vec!["ada", "linus"]);

    let one: Option<Order> = service.find_one(Conditions::new().eq("customer", "grace")).await.unwrap();
    assert_eq!(one.map(|o| o.total), Some(3.0));

    let by_name: Vec<Order> = service
        .quick_find_by("customer", vec!["ada", "linus"])
        .await
        .unwrap();
    assert_eq!(by_name.len(), 2);

    let single: Vec<Order> = service.quick_find_by("customer", vec!["grace"]).await.unwrap();
    assert_eq!(single.len(), 1);

    let none: Vec<Order> = service.quick_find_by("customer", Vec::<String>::new()).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_get_missing_record_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir).await;

    let result = service.get::<Order>(Conditions::new().eq("id", 99i64)).await;
    match result {
        Err(DatabaseError::RecordNotFound(table)) => assert_eq!(table, "orders"),
        other => panic!("Expected RecordNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_update_and_delete_by_conditions() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir).await;
    service
        .add_all(&[order("ada", 1.0, "open"), order("grace", 2.0, "open"), order("linus", 3.0, "shipped")])
        .await
        .unwrap();

    let mut changes = Fields::new();
    changes.insert("status".to_string(), DatabaseValue::from("shipped"));
    let updated = service
        .update_where::<Order>(changes, Conditions::new().eq("status", "open"))
        .await
        .unwrap();
    assert_eq!(updated, 2);

    let shipped: Vec<Order> = service.find(Conditions::new().eq("status", "shipped")).await.unwrap();
    assert_eq!(shipped.len(), 3);

    let deleted = service
        .delete_where::<Order>(Conditions::new().is_in("customer", ["ada", "grace"]))
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    let remaining: Vec<Order> = service.find(Conditions::new()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].customer, "linus");
}

#[tokio::test]
async fn test_unique_violation_is_a_wrapped_duplicate_record() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir).await;

    service.add(&product("A-1", "pen", 10)).await.unwrap();
    let err = service.add(&product("A-1", "pencil", 4)).await.unwrap_err();

    assert!(matches!(err, DatabaseError::Operation(_)));
    assert!(matches!(err.root_cause(), DatabaseError::DuplicateRecord(_)));

    let products: Vec<Product> = service.find(Conditions::new()).await.unwrap();
    assert_eq!(products.len(), 1);
}

#[tokio::test]
async fn test_upsert_updates_matches_and_inserts_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir).await;
    service.add(&product("A-1", "pen", 10)).await.unwrap();

    let summary = service
        .upsert(&[product("A-1", "pen", 25), product("B-2", "ink", 3)], &["sku"])
        .await
        .unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.inserted, 1);

    let pen: Product = service.get(Conditions::new().eq("sku", "A-1")).await.unwrap();
    assert_eq!(pen.stock, 25);
    let ink: Product = service.get(Conditions::new().eq("sku", "B-2")).await.unwrap();
    assert_eq!(ink.name, "ink");

    let err = service.upsert(&[product("C-3", "nib", 1)], &[]).await.unwrap_err();
    assert!(matches!(err, DatabaseError::Validation(_)));
}

#[tokio::test]
async fn test_failed_operation_rolls_back_its_writes() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir).await;

    let result: sqlax::DbResult<()> = service
        .execute(|session| {
            Box::pin(async move {
                session
                    .execute(
                        "INSERT INTO orders (customer, total, status) VALUES (?, ?, ?)",
                        &[
                            DatabaseValue::from("ghost"),
                            DatabaseValue::Float64(1.0),
                            DatabaseValue::from("open"),
                        ],
                    )
                    .await?;
                Err::<(), _>(DatabaseError::Validation("abort".to_string()))
            })
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err.root_cause(), DatabaseError::Validation(_)));

    let orders: Vec<Order> = service.find(Conditions::new()).await.unwrap();
    assert!(orders.is_empty());
}

#[tokio::test]
async fn test_operations_without_a_database_report_connection_unavailable() {
    let service = Service::new(manager(vec!["bad://x".to_string()]));

    let err = service.find::<Order>(Conditions::new()).await.unwrap_err();
    assert!(err.is_connection_unavailable());
}
