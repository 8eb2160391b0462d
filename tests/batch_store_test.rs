mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use rstest::rstest;
use rxstock::{
    entities::batch_movement::MovementType,
    errors::ServiceError,
    services::batches::{AddBatchRequest, UpdateBatchRequest},
};
use uuid::Uuid;

use common::TestApp;

#[tokio::test]
async fn registering_a_batch_opens_its_ledger() {
    let app = TestApp::new().await;
    let pharmacy_id = Uuid::new_v4();
    let item = app.seed_item(pharmacy_id, "Paracetamol 500mg").await;

    let batch = app.seed_batch(item.id, "LOT-2024-001", 100, 180).await;

    assert_eq!(batch.quantity, 100);
    assert_eq!(batch.remaining_qty, 100);
    assert_eq!(batch.pharmacy_id, pharmacy_id);

    let history = app
        .services
        .movements
        .history(batch.id)
        .await
        .expect("movement history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].movement_type(), Some(MovementType::Addition));
    assert_eq!(history[0].quantity_delta, 100);
    assert_eq!(history[0].order_id, None);

    let check = app
        .services
        .movements
        .verify_batch(batch.id)
        .await
        .expect("ledger check");
    assert!(check.consistent);
    assert_eq!(check.net_delta, 100);
}

#[rstest]
#[case::short_code("AB", 60, 180, 100)]
#[case::expiry_before_manufacturing("LOT-001", 10, -20, 100)]
#[case::already_expired("LOT-002", 400, -10, 100)]
#[case::zero_quantity("LOT-003", 60, 180, 0)]
#[case::negative_quantity("LOT-004", 60, 180, -5)]
#[tokio::test]
async fn invalid_batch_registrations_are_rejected(
    #[case] code: &str,
    #[case] manufactured_days_ago: i64,
    #[case] expires_in_days: i64,
    #[case] quantity: i32,
) {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Ibuprofen 200mg").await;

    let err = app
        .services
        .batches
        .add_batch(AddBatchRequest {
            inventory_id: item.id,
            batch_code: code.to_string(),
            manufacturing_date: Utc::now().date_naive() - Duration::days(manufactured_days_ago),
            expiry_date: Utc::now().date_naive() + Duration::days(expires_in_days),
            quantity,
            created_by: None,
        })
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn duplicate_batch_code_conflicts_within_an_item_only() {
    let app = TestApp::new().await;
    let pharmacy_id = Uuid::new_v4();
    let item_a = app.seed_item(pharmacy_id, "Amoxicillin 500mg").await;
    let item_b = app.seed_item(pharmacy_id, "Cetirizine 10mg").await;

    app.seed_batch(item_a.id, "LOT-SHARED", 50, 90).await;

    let err = app
        .services
        .batches
        .add_batch(AddBatchRequest {
            inventory_id: item_a.id,
            batch_code: "LOT-SHARED".to_string(),
            manufacturing_date: Utc::now().date_naive() - Duration::days(30),
            expiry_date: Utc::now().date_naive() + Duration::days(120),
            quantity: 25,
            created_by: None,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    // The same code under a different item is a different physical lot.
    app.seed_batch(item_b.id, "LOT-SHARED", 25, 120).await;
}

#[tokio::test]
async fn add_batch_rejects_unknown_item() {
    let app = TestApp::new().await;

    let err = app
        .services
        .batches
        .add_batch(AddBatchRequest {
            inventory_id: Uuid::new_v4(),
            batch_code: "LOT-404".to_string(),
            manufacturing_date: Utc::now().date_naive() - Duration::days(30),
            expiry_date: Utc::now().date_naive() + Duration::days(120),
            quantity: 10,
            created_by: None,
        })
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn add_stock_grows_quantity_and_remaining_together() {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Metformin 850mg").await;
    let batch = app.seed_batch(item.id, "LOT-GROW", 100, 180).await;

    app.services
        .consumption
        .consume(item.id, 30, None, None)
        .await
        .expect("consume part of the batch");

    let updated = app
        .services
        .batches
        .add_stock(batch.id, 50, None)
        .await
        .expect("add stock");

    assert_eq!(updated.quantity, 150);
    assert_eq!(updated.remaining_qty, 120);

    let check = app
        .services
        .movements
        .verify_batch(batch.id)
        .await
        .expect("ledger check");
    assert!(check.consistent);
    assert_eq!(check.net_delta, 120);
}

#[tokio::test]
async fn adjustments_are_bounded_by_the_batch() {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Omeprazole 20mg").await;
    let batch = app.seed_batch(item.id, "LOT-ADJ", 100, 180).await;

    let updated = app
        .services
        .batches
        .record_adjustment(batch.id, -8, None)
        .await
        .expect("write off broken blister");
    assert_eq!(updated.remaining_qty, 92);

    // Cannot remove more than remains.
    let err = app
        .services
        .batches
        .record_adjustment(batch.id, -200, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // Cannot push remaining past the received quantity.
    let err = app
        .services
        .batches
        .record_adjustment(batch.id, 9, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));

    // Found one of the written-off packs again.
    let updated = app
        .services
        .batches
        .record_adjustment(batch.id, 3, None)
        .await
        .expect("restore miscounted pack");
    assert_eq!(updated.remaining_qty, 95);

    let history = app
        .services
        .movements
        .history(batch.id)
        .await
        .expect("movement history");
    let adjustment_deltas: Vec<i32> = history
        .iter()
        .filter(|m| m.movement_type() == Some(MovementType::Adjustment))
        .map(|m| m.quantity_delta)
        .collect();
    assert_eq!(adjustment_deltas, vec![-8, 3]);

    let check = app
        .services
        .movements
        .verify_batch(batch.id)
        .await
        .expect("ledger check");
    assert!(check.consistent);
}

#[tokio::test]
async fn consumed_batches_cannot_be_deleted() {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Atorvastatin 40mg").await;
    let batch = app.seed_batch(item.id, "LOT-DEL", 60, 180).await;

    app.services
        .consumption
        .consume(item.id, 10, None, None)
        .await
        .expect("consume from batch");

    let err = app
        .services
        .batches
        .delete_batch(batch.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    // The batch and its history are still there.
    assert_eq!(app.batch_remaining(batch.id).await, 50);
    let history = app
        .services
        .movements
        .history(batch.id)
        .await
        .expect("movement history");
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn untouched_batches_delete_together_with_their_ledger() {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Lisinopril 10mg").await;
    let batch = app.seed_batch(item.id, "LOT-CLEAN", 60, 180).await;

    app.services
        .batches
        .delete_batch(batch.id)
        .await
        .expect("delete untouched batch");

    let gone = app
        .services
        .batches
        .get_batch(batch.id)
        .await
        .expect("lookup");
    assert!(gone.is_none());

    let history = app
        .services
        .movements
        .history(batch.id)
        .await
        .expect("movement history");
    assert!(history.is_empty());
}

#[tokio::test]
async fn metadata_updates_leave_quantities_alone() {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Sertraline 50mg").await;
    let batch = app.seed_batch(item.id, "LOT-META", 40, 90).await;

    let updated = app
        .services
        .batches
        .update_batch(
            batch.id,
            UpdateBatchRequest {
                batch_code: Some("LOT-META-FIXED".to_string()),
                expiry_date: Some(Utc::now().date_naive() + Duration::days(60)),
                ..Default::default()
            },
        )
        .await
        .expect("update metadata");

    assert_eq!(updated.batch_code, "LOT-META-FIXED");
    assert_eq!(updated.quantity, 40);
    assert_eq!(updated.remaining_qty, 40);

    let err = app
        .services
        .batches
        .update_batch(
            batch.id,
            UpdateBatchRequest {
                remaining_qty: Some(10),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn expiry_reports_split_expired_from_expiring() {
    let app = TestApp::new().await;
    let pharmacy_id = Uuid::new_v4();
    let item = app.seed_item(pharmacy_id, "Insulin glargine").await;

    let expired = app.seed_expired_batch(item.id, "LOT-OLD", 20, 5).await;
    let soon = app.seed_batch(item.id, "LOT-SOON", 30, 10).await;
    let later = app.seed_batch(item.id, "LOT-LATER", 40, 200).await;

    let expired_report = app
        .services
        .batches
        .get_expired_batches(pharmacy_id)
        .await
        .expect("expired report");
    assert_eq!(expired_report.len(), 1);
    assert_eq!(expired_report[0].id, expired.id);

    let expiring_report = app
        .services
        .batches
        .get_expiring_batches(pharmacy_id, 30)
        .await
        .expect("expiring report");
    assert_eq!(expiring_report.len(), 1);
    assert_eq!(expiring_report[0].id, soon.id);

    let wide_report = app
        .services
        .batches
        .get_expiring_batches(pharmacy_id, 365)
        .await
        .expect("expiring report");
    assert_eq!(wide_report.len(), 2);
    assert_eq!(wide_report[0].id, soon.id);
    assert_eq!(wide_report[1].id, later.id);
}
