use crate::{
    db::DbPool,
    entities::batch::Entity as BatchEntity,
    entities::batch_movement::{self, Entity as BatchMovementEntity, MovementType},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// A movement waiting to be appended to the ledger
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub batch_id: Uuid,
    pub movement_type: MovementType,
    pub quantity_delta: i32,
    pub order_id: Option<Uuid>,
    pub performed_by: Option<Uuid>,
}

/// Result of replaying a batch ledger against the materialized quantity
#[derive(Debug, Clone, Serialize)]
pub struct LedgerCheck {
    pub batch_id: Uuid,
    pub remaining_qty: i32,
    pub net_delta: i64,
    pub consistent: bool,
}

/// Append-only ledger over batch stock changes. Every change to a batch's
/// remaining quantity goes through `record` in the same transaction, so
/// replaying the deltas always reproduces the materialized value.
#[derive(Clone)]
pub struct MovementLedger {
    db_pool: Arc<DbPool>,
}

impl MovementLedger {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Appends one movement row. Takes any connection so callers can pass
    /// their open transaction and have the ledger row commit or roll back
    /// together with the stock change it describes.
    pub async fn record<C>(
        conn: &C,
        movement: NewMovement,
    ) -> Result<batch_movement::Model, ServiceError>
    where
        C: ConnectionTrait,
    {
        match movement.movement_type {
            MovementType::Addition if movement.quantity_delta <= 0 => {
                return Err(ServiceError::ValidationError(
                    "Addition movements require a positive quantity delta".to_string(),
                ));
            }
            MovementType::Consumption if movement.quantity_delta >= 0 => {
                return Err(ServiceError::ValidationError(
                    "Consumption movements require a negative quantity delta".to_string(),
                ));
            }
            MovementType::Adjustment if movement.quantity_delta == 0 => {
                return Err(ServiceError::ValidationError(
                    "Adjustment movements require a non-zero quantity delta".to_string(),
                ));
            }
            _ => {}
        }

        if movement.order_id.is_some() && movement.movement_type != MovementType::Consumption {
            return Err(ServiceError::ValidationError(
                "Only consumption movements may reference an order".to_string(),
            ));
        }

        let row = batch_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            batch_id: Set(movement.batch_id),
            movement_type: Set(movement.movement_type.as_str().to_string()),
            quantity_delta: Set(movement.quantity_delta),
            order_id: Set(movement.order_id),
            performed_by: Set(movement.performed_by),
            created_at: Set(Utc::now()),
        };

        row.insert(conn).await.map_err(ServiceError::db_error)
    }

    /// Full movement history for a batch, oldest first.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn history(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<batch_movement::Model>, ServiceError> {
        let db = &*self.db_pool;

        BatchMovementEntity::find()
            .filter(batch_movement::Column::BatchId.eq(batch_id))
            .order_by_asc(batch_movement::Column::CreatedAt)
            .order_by_asc(batch_movement::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Net signed quantity across every movement of the batch.
    pub async fn net_delta(&self, batch_id: Uuid) -> Result<i64, ServiceError> {
        let movements = self.history(batch_id).await?;
        Ok(movements.iter().map(|m| i64::from(m.quantity_delta)).sum())
    }

    /// Replays the ledger and compares the result against the batch row.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn verify_batch(&self, batch_id: Uuid) -> Result<LedgerCheck, ServiceError> {
        let db = &*self.db_pool;

        let batch = BatchEntity::find_by_id(batch_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        let net_delta = self.net_delta(batch_id).await?;

        Ok(LedgerCheck {
            batch_id,
            remaining_qty: batch.remaining_qty,
            net_delta,
            consistent: net_delta == i64::from(batch.remaining_qty),
        })
    }
}
