use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use rxstock::{
    db::{self, DbConfig, DbPool},
    entities::{batch, inventory_item},
    events::{process_events, EventSender},
    services::batches::{AddBatchRequest, UpdateBatchRequest},
    services::inventory::CreateItemRequest,
    services::AppServices,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Helper harness for spinning up the services against an in-memory
/// SQLite database.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct fresh state. Each in-memory SQLite connection is its own
    /// database, so the pool is pinned to a single connection.
    pub async fn new() -> Self {
        let config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };

        let pool = db::establish_connection_with_config(&config)
            .await
            .expect("failed to create test database");

        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);

        let (tx, rx) = mpsc::channel(100);
        let sender = Arc::new(EventSender::new(tx));
        let event_task = tokio::spawn(process_events(rx));

        let services = AppServices::new(db.clone(), Some(sender));

        Self {
            db,
            services,
            _event_task: event_task,
        }
    }

    pub async fn seed_item(&self, pharmacy_id: Uuid, name: &str) -> inventory_item::Model {
        self.services
            .inventory
            .create_item(CreateItemRequest {
                pharmacy_id,
                name: name.to_string(),
                brand_name: None,
                form: Some("tablet".to_string()),
                price: dec!(9.99),
                stock: None,
            })
            .await
            .expect("seed item")
    }

    /// Registers a batch expiring `expires_in_days` from today (0 = today).
    pub async fn seed_batch(
        &self,
        inventory_id: Uuid,
        code: &str,
        quantity: i32,
        expires_in_days: i64,
    ) -> batch::Model {
        self.services
            .batches
            .add_batch(AddBatchRequest {
                inventory_id,
                batch_code: code.to_string(),
                manufacturing_date: Utc::now().date_naive() - Duration::days(60),
                expiry_date: Utc::now().date_naive() + Duration::days(expires_in_days),
                quantity,
                created_by: None,
            })
            .await
            .expect("seed batch")
    }

    /// Registers a batch, then backdates its expiry so it is already
    /// expired. Mirrors an operator correcting a mislabelled batch.
    pub async fn seed_expired_batch(
        &self,
        inventory_id: Uuid,
        code: &str,
        quantity: i32,
        expired_days_ago: i64,
    ) -> batch::Model {
        let created = self.seed_batch(inventory_id, code, quantity, 30).await;

        self.services
            .batches
            .update_batch(
                created.id,
                UpdateBatchRequest {
                    expiry_date: Some(Utc::now().date_naive() - Duration::days(expired_days_ago)),
                    ..Default::default()
                },
            )
            .await
            .expect("backdate batch expiry")
    }

    pub async fn batch_remaining(&self, batch_id: Uuid) -> i32 {
        self.services
            .batches
            .get_batch(batch_id)
            .await
            .expect("fetch batch")
            .expect("batch should exist")
            .remaining_qty
    }
}
