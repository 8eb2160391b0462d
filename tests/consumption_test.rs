mod common;

use assert_matches::assert_matches;
use rxstock::{
    entities::batch_movement::MovementType,
    errors::ServiceError,
    services::allocation::BatchAllocation,
};
use uuid::Uuid;

use common::TestApp;

#[tokio::test]
async fn consuming_across_batches_keeps_every_ledger_consistent() {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Levothyroxine 100mcg").await;

    let soonest = app.seed_batch(item.id, "LOT-1", 40, 5).await;
    let later = app.seed_batch(item.id, "LOT-2", 60, 25).await;
    let order_id = Uuid::new_v4();
    let pharmacist = Uuid::new_v4();

    let committed = app
        .services
        .consumption
        .consume(item.id, 55, Some(order_id), Some(pharmacist))
        .await
        .expect("consume across batches");

    assert_eq!(committed.len(), 2);
    assert_eq!(committed[0].batch_id, soonest.id);
    assert_eq!(committed[0].quantity, 40);
    assert_eq!(committed[1].batch_id, later.id);
    assert_eq!(committed[1].quantity, 15);

    assert_eq!(app.batch_remaining(soonest.id).await, 0);
    assert_eq!(app.batch_remaining(later.id).await, 45);

    for batch_id in [soonest.id, later.id] {
        let check = app
            .services
            .movements
            .verify_batch(batch_id)
            .await
            .expect("ledger check");
        assert!(check.consistent, "ledger drifted for batch {}", batch_id);
    }

    // Each decrement left a consumption movement tagged with the order.
    let history = app
        .services
        .movements
        .history(soonest.id)
        .await
        .expect("movement history");
    let consumption = history
        .iter()
        .find(|m| m.movement_type() == Some(MovementType::Consumption))
        .expect("consumption movement");
    assert_eq!(consumption.quantity_delta, -40);
    assert_eq!(consumption.order_id, Some(order_id));
    assert_eq!(consumption.performed_by, Some(pharmacist));
}

#[tokio::test]
async fn shortfall_fails_closed_without_consuming_anything() {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Gabapentin 300mg").await;

    let only = app.seed_batch(item.id, "LOT-ONLY", 30, 20).await;

    let err = app
        .services
        .consumption
        .consume(item.id, 45, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    assert_eq!(app.batch_remaining(only.id).await, 30);

    let history = app
        .services
        .movements
        .history(only.id)
        .await
        .expect("movement history");
    assert!(history
        .iter()
        .all(|m| m.movement_type() != Some(MovementType::Consumption)));
}

#[tokio::test]
async fn consume_rejects_non_positive_quantities() {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Tramadol 50mg").await;
    app.seed_batch(item.id, "LOT-T", 10, 30).await;

    let err = app
        .services
        .consumption
        .consume(item.id, 0, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .services
        .consumption
        .consume(item.id, -3, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

// 20 concurrent single-unit draws against a 10 unit batch. The conditional
// decrement decides the winners; exactly ten must get through.
#[tokio::test]
async fn concurrent_draws_never_oversell_a_batch() {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Salbutamol inhaler").await;
    let batch = app.seed_batch(item.id, "LOT-RACE", 10, 90).await;

    let mut tasks = vec![];
    for _ in 0..20 {
        let consumption = app.services.consumption.clone();
        let inventory_id = item.id;
        tasks.push(tokio::spawn(async move {
            consumption
                .consume(inventory_id, 1, None, None)
                .await
                .is_ok()
        }));
    }

    let mut success = 0;
    for task in tasks {
        if task.await.unwrap_or(false) {
            success += 1;
        }
    }

    assert_eq!(
        success, 10,
        "exactly 10 draws should succeed; got {}",
        success
    );
    assert_eq!(app.batch_remaining(batch.id).await, 0);

    let check = app
        .services
        .movements
        .verify_batch(batch.id)
        .await
        .expect("ledger check");
    assert!(check.consistent);
    assert_eq!(check.net_delta, 0);
}

#[tokio::test]
async fn operator_allocations_commit_exactly_as_given() {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Morphine 10mg").await;

    // The operator deliberately draws down the later-expiring batch.
    let near = app.seed_batch(item.id, "LOT-NEAR", 50, 10).await;
    let far = app.seed_batch(item.id, "LOT-FAR", 50, 40).await;

    let committed = app
        .services
        .consumption
        .consume_allocations(
            item.id,
            &[BatchAllocation {
                batch_id: far.id,
                quantity: 20,
            }],
            None,
            None,
        )
        .await
        .expect("manual consumption");

    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].batch_id, far.id);
    assert_eq!(app.batch_remaining(near.id).await, 50);
    assert_eq!(app.batch_remaining(far.id).await, 30);
}

#[tokio::test]
async fn operator_may_draw_from_expired_stock() {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Adrenaline 1mg/ml").await;

    let expired = app.seed_expired_batch(item.id, "LOT-EXP", 15, 2).await;

    let committed = app
        .services
        .consumption
        .consume_allocations(
            item.id,
            &[BatchAllocation {
                batch_id: expired.id,
                quantity: 5,
            }],
            None,
            None,
        )
        .await
        .expect("expired stock override");

    assert_eq!(committed[0].quantity, 5);
    assert_eq!(app.batch_remaining(expired.id).await, 10);
}

#[tokio::test]
async fn operator_allocations_fail_without_substitution() {
    let app = TestApp::new().await;
    let item = app.seed_item(Uuid::new_v4(), "Diazepam 5mg").await;

    let small = app.seed_batch(item.id, "LOT-SMALL", 8, 30).await;
    let large = app.seed_batch(item.id, "LOT-LARGE", 100, 60).await;

    // More than the chosen batch holds. The other batch could cover it,
    // but a manual pick is never silently rerouted.
    let err = app
        .services
        .consumption
        .consume_allocations(
            item.id,
            &[BatchAllocation {
                batch_id: small.id,
                quantity: 12,
            }],
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    assert_eq!(app.batch_remaining(small.id).await, 8);
    assert_eq!(app.batch_remaining(large.id).await, 100);
}

#[tokio::test]
async fn operator_allocations_validate_batch_ownership() {
    let app = TestApp::new().await;
    let item_a = app.seed_item(Uuid::new_v4(), "Ramipril 5mg").await;
    let item_b = app.seed_item(Uuid::new_v4(), "Bisoprolol 5mg").await;

    let foreign = app.seed_batch(item_b.id, "LOT-B", 30, 30).await;

    let err = app
        .services
        .consumption
        .consume_allocations(
            item_a.id,
            &[BatchAllocation {
                batch_id: foreign.id,
                quantity: 5,
            }],
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .services
        .consumption
        .consume_allocations(item_a.id, &[], None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .services
        .consumption
        .consume_allocations(
            item_a.id,
            &[BatchAllocation {
                batch_id: Uuid::new_v4(),
                quantity: 5,
            }],
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
