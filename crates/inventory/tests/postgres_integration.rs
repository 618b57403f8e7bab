//! PostgreSQL integration tests for the stock ledger.
//!
//! ```bash
//! cargo test -p inventory --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::AggregateId;
use domain::{Aggregate, LineItem, Money, Product};
use inventory::{
    Claim, ClaimToken, LedgerError, PostgresStockLedger, ReservationStatus, StockLedger,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use version_store::Version;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            version_store::run_migrations(&temp_pool).await.unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_ledger() -> PostgresStockLedger {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE products, reservations")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStockLedger::new(pool)
}

async fn add_product(ledger: &PostgresStockLedger, quantity: u32) -> AggregateId {
    let product =
        Product::new(AggregateId::new(), "Widget", Money::from_cents(1000), quantity).unwrap();
    let id = product.id();
    ledger.insert_product(product).await.unwrap();
    id
}

async fn claim(ledger: &PostgresStockLedger, order_id: AggregateId) -> ClaimToken {
    match ledger.claim(order_id).await.unwrap() {
        Claim::Claimed(token) => token,
        Claim::Existing(r) => panic!("order already has a {} reservation", r.status),
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn debit_is_conditional_and_recorded() {
    let ledger = get_test_ledger().await;
    let id = add_product(&ledger, 5).await;
    let order_id = AggregateId::new();
    let token = claim(&ledger, order_id).await;

    let after = ledger.debit(order_id, token, LineItem::new(id, 5)).await.unwrap();
    assert_eq!(after.data.quantity(), 0);
    assert_eq!(after.version, Version::new(2));

    let err = ledger
        .debit(order_id, token, LineItem::new(id, 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientStock { requested: 1, available: 0, .. }
    ));

    let record = ledger.reservation(order_id).await.unwrap().unwrap();
    assert_eq!(record.status, ReservationStatus::Pending);
    assert_eq!(record.claim, Some(token));
    assert_eq!(record.items, vec![LineItem::new(id, 5)]);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn concurrent_debits_never_oversell() {
    let ledger = get_test_ledger().await;
    let id = add_product(&ledger, 5).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let order_id = AggregateId::new();
            let token = claim(&ledger, order_id).await;
            ledger.debit(order_id, token, LineItem::new(id, 1)).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 5);
    let product = ledger.product(id).await.unwrap().unwrap();
    assert_eq!(product.data.quantity(), 0);
    assert_eq!(product.version, Version::new(6));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn update_product_checks_version() {
    let ledger = get_test_ledger().await;
    let id = add_product(&ledger, 5).await;
    let current = ledger.product(id).await.unwrap().unwrap();
    let edited = current.data.edit("Gadget", Money::from_cents(2500), 8).unwrap();

    let saved = ledger
        .update_product(Version::first(), edited.clone())
        .await
        .unwrap();
    assert_eq!(saved.data.title(), "Gadget");

    let err = ledger
        .update_product(Version::first(), edited)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn reservation_lifecycle() {
    let ledger = get_test_ledger().await;
    let id = add_product(&ledger, 10).await;
    let order_id = AggregateId::new();

    let token = claim(&ledger, order_id).await;
    ledger.debit(order_id, token, LineItem::new(id, 4)).await.unwrap();
    ledger.hold(order_id, token).await.unwrap();

    let released = ledger.release(order_id).await.unwrap().unwrap();
    assert_eq!(released.items, vec![LineItem::new(id, 4)]);
    assert_eq!(released.products[0].data.quantity(), 10);

    // Redelivered release is a no-op.
    assert!(ledger.release(order_id).await.unwrap().is_none());
    assert_eq!(ledger.product(id).await.unwrap().unwrap().data.quantity(), 10);

    let record = ledger.reservation(order_id).await.unwrap().unwrap();
    assert_eq!(record.status, ReservationStatus::Released);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn release_before_reserve_leaves_tombstone() {
    let ledger = get_test_ledger().await;
    let order_id = AggregateId::new();

    assert!(ledger.release(order_id).await.unwrap().is_none());
    assert!(matches!(
        ledger.claim(order_id).await.unwrap(),
        Claim::Existing(r) if r.status == ReservationStatus::Released
    ));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn release_during_reserve_gives_back_recorded_debits() {
    let ledger = get_test_ledger().await;
    let id = add_product(&ledger, 10).await;
    let order_id = AggregateId::new();

    let token = claim(&ledger, order_id).await;
    ledger.debit(order_id, token, LineItem::new(id, 3)).await.unwrap();

    let released = ledger.release(order_id).await.unwrap().unwrap();
    assert_eq!(released.items, vec![LineItem::new(id, 3)]);
    assert_eq!(ledger.product(id).await.unwrap().unwrap().data.quantity(), 10);

    assert!(matches!(
        ledger.hold(order_id, token).await,
        Err(LedgerError::ReservationClosed { .. })
    ));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn abandon_requires_the_claim() {
    let ledger = get_test_ledger().await;
    let id = add_product(&ledger, 10).await;
    let order_id = AggregateId::new();

    let token = claim(&ledger, order_id).await;
    ledger.debit(order_id, token, LineItem::new(id, 6)).await.unwrap();

    assert!(ledger.abandon(order_id, ClaimToken::new()).await.unwrap().is_none());
    assert_eq!(ledger.product(id).await.unwrap().unwrap().data.quantity(), 4);

    ledger.abandon(order_id, token).await.unwrap().unwrap();
    assert_eq!(ledger.product(id).await.unwrap().unwrap().data.quantity(), 10);
    assert!(ledger.reservation(order_id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn stale_pending_reservation_is_reclaimed() {
    let ledger = get_test_ledger().await;
    let id = add_product(&ledger, 10).await;
    let order_id = AggregateId::new();

    let token = claim(&ledger, order_id).await;
    ledger.debit(order_id, token, LineItem::new(id, 7)).await.unwrap();

    assert!(
        ledger
            .reclaim_stale(order_id, Duration::from_secs(3600))
            .await
            .unwrap()
            .is_none()
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    let released = ledger
        .reclaim_stale(order_id, Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(released.items, vec![LineItem::new(id, 7)]);
    assert_eq!(ledger.product(id).await.unwrap().unwrap().data.quantity(), 10);

    assert!(matches!(
        ledger.debit(order_id, token, LineItem::new(id, 1)).await,
        Err(LedgerError::ClaimLost(_))
    ));
    assert!(matches!(ledger.claim(order_id).await.unwrap(), Claim::Claimed(_)));
}
