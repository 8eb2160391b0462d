use crate::{
    db::DbPool,
    entities::batch::{self, Entity as BatchEntity},
    entities::batch_movement::{self, Entity as BatchMovementEntity, MovementType},
    entities::inventory_item::Entity as InventoryItemEntity,
    errors::ServiceError,
    events::{Event, EventSender},
    services::movements::{MovementLedger, NewMovement},
};
use chrono::{Duration, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddBatchRequest {
    pub inventory_id: Uuid,
    #[validate(length(min = 3, message = "Batch code must be at least 3 characters"))]
    pub batch_code: String,
    pub manufacturing_date: NaiveDate,
    pub expiry_date: NaiveDate,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    pub created_by: Option<Uuid>,
}

/// Metadata corrections for an existing batch. Quantity fields are present
/// only so that attempts to edit them can be rejected with a pointer to the
/// ledger-tracked paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateBatchRequest {
    pub batch_code: Option<String>,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub quantity: Option<i32>,
    pub remaining_qty: Option<i32>,
}

/// Store for batches and their stock levels. Every quantity change flows
/// through here together with its ledger movement, in one transaction.
#[derive(Clone)]
pub struct BatchService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl BatchService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Registers a newly received batch and its opening `addition` movement.
    #[instrument(skip(self, request), fields(inventory_id = %request.inventory_id, batch_code = %request.batch_code))]
    pub async fn add_batch(&self, request: AddBatchRequest) -> Result<batch::Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        if request.expiry_date <= request.manufacturing_date {
            return Err(ServiceError::ValidationError(
                "Expiry date must be after manufacturing date".to_string(),
            ));
        }

        let today = Utc::now().date_naive();
        if request.expiry_date < today {
            return Err(ServiceError::ValidationError(
                "Cannot register a batch that has already expired".to_string(),
            ));
        }

        let db = &*self.db_pool;

        let item = InventoryItemEntity::find_by_id(request.inventory_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Inventory item {} not found",
                    request.inventory_id
                ))
            })?;

        let duplicate = BatchEntity::find()
            .filter(batch::Column::InventoryId.eq(request.inventory_id))
            .filter(batch::Column::BatchCode.eq(request.batch_code.clone()))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        if duplicate.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Batch code '{}' already exists for this item",
                request.batch_code
            )));
        }

        let batch_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for batch creation");
            ServiceError::DatabaseError(e)
        })?;

        let batch_model = batch::ActiveModel {
            id: Set(batch_id),
            inventory_id: Set(request.inventory_id),
            pharmacy_id: Set(item.pharmacy_id),
            batch_code: Set(request.batch_code.clone()),
            manufacturing_date: Set(request.manufacturing_date),
            expiry_date: Set(request.expiry_date),
            quantity: Set(request.quantity),
            remaining_qty: Set(request.quantity),
            created_by: Set(request.created_by),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, batch_id = %batch_id, "Failed to insert batch");
            ServiceError::DatabaseError(e)
        })?;

        MovementLedger::record(
            &txn,
            NewMovement {
                batch_id,
                movement_type: MovementType::Addition,
                quantity_delta: request.quantity,
                order_id: None,
                performed_by: request.created_by,
            },
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, batch_id = %batch_id, "Failed to commit batch creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(batch_id = %batch_id, quantity = request.quantity, "Batch registered");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::BatchCreated {
                    batch_id,
                    inventory_id: request.inventory_id,
                    quantity: request.quantity,
                    expiry_date: request.expiry_date,
                })
                .await
            {
                warn!(error = %e, batch_id = %batch_id, "Failed to send batch created event");
            }
        }

        Ok(batch_model)
    }

    /// Receives additional units into an existing batch. Grows `quantity`
    /// and `remaining_qty` together so the consumed share is preserved.
    #[instrument(skip(self), fields(batch_id = %batch_id, quantity = quantity))]
    pub async fn add_stock(
        &self,
        batch_id: Uuid,
        quantity: i32,
        performed_by: Option<Uuid>,
    ) -> Result<batch::Model, ServiceError> {
        use sea_orm::sea_query::Expr;

        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Added quantity must be positive".to_string(),
            ));
        }

        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let update = BatchEntity::update_many()
            .col_expr(
                batch::Column::Quantity,
                Expr::col(batch::Column::Quantity).add(quantity),
            )
            .col_expr(
                batch::Column::RemainingQty,
                Expr::col(batch::Column::RemainingQty).add(quantity),
            )
            .col_expr(batch::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(batch::Column::Id.eq(batch_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if update.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Batch {} not found",
                batch_id
            )));
        }

        MovementLedger::record(
            &txn,
            NewMovement {
                batch_id,
                movement_type: MovementType::Addition,
                quantity_delta: quantity,
                order_id: None,
                performed_by,
            },
        )
        .await?;

        let updated = BatchEntity::find_by_id(batch_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(batch_id = %batch_id, quantity = quantity, new_remaining = updated.remaining_qty, "Stock added to batch");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::StockAdded {
                    batch_id,
                    quantity,
                    new_remaining: updated.remaining_qty,
                })
                .await
            {
                warn!(error = %e, batch_id = %batch_id, "Failed to send stock added event");
            }
        }

        Ok(updated)
    }

    /// Applies a signed stock correction through the ledger. The remaining
    /// quantity must stay within [0, quantity]; the guards run inside the
    /// UPDATE itself so concurrent corrections cannot slip past the bounds.
    #[instrument(skip(self), fields(batch_id = %batch_id, delta = delta))]
    pub async fn record_adjustment(
        &self,
        batch_id: Uuid,
        delta: i32,
        performed_by: Option<Uuid>,
    ) -> Result<batch::Model, ServiceError> {
        use sea_orm::sea_query::Expr;

        if delta == 0 {
            return Err(ServiceError::ValidationError(
                "Adjustment delta must be non-zero".to_string(),
            ));
        }

        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        BatchEntity::find_by_id(batch_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        let update = BatchEntity::update_many()
            .col_expr(
                batch::Column::RemainingQty,
                Expr::col(batch::Column::RemainingQty).add(delta),
            )
            .col_expr(batch::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(batch::Column::Id.eq(batch_id))
            .filter(if delta < 0 {
                batch::Column::RemainingQty.gte(-delta)
            } else {
                Expr::col(batch::Column::RemainingQty)
                    .lte(Expr::col(batch::Column::Quantity).sub(delta))
            })
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if update.rows_affected == 0 {
            return Err(if delta < 0 {
                ServiceError::InsufficientStock(format!(
                    "Batch {} holds less than {} units",
                    batch_id, -delta
                ))
            } else {
                ServiceError::InvalidOperation(format!(
                    "Adjustment of +{} would push batch {} above its received quantity",
                    delta, batch_id
                ))
            });
        }

        MovementLedger::record(
            &txn,
            NewMovement {
                batch_id,
                movement_type: MovementType::Adjustment,
                quantity_delta: delta,
                order_id: None,
                performed_by,
            },
        )
        .await?;

        let updated = BatchEntity::find_by_id(batch_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(batch_id = %batch_id, delta = delta, new_remaining = updated.remaining_qty, "Stock adjustment recorded");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::StockAdjusted {
                    batch_id,
                    delta,
                    new_remaining: updated.remaining_qty,
                })
                .await
            {
                warn!(error = %e, batch_id = %batch_id, "Failed to send stock adjusted event");
            }
        }

        Ok(updated)
    }

    /// Corrects batch metadata. Quantity fields are off limits: stock only
    /// changes through add_stock, record_adjustment or consumption so the
    /// ledger stays complete.
    #[instrument(skip(self, request), fields(batch_id = %batch_id))]
    pub async fn update_batch(
        &self,
        batch_id: Uuid,
        request: UpdateBatchRequest,
    ) -> Result<batch::Model, ServiceError> {
        if request.quantity.is_some() || request.remaining_qty.is_some() {
            return Err(ServiceError::ValidationError(
                "Quantity cannot be edited directly; use add_stock or record_adjustment"
                    .to_string(),
            ));
        }

        let db = &*self.db_pool;

        let existing = BatchEntity::find_by_id(batch_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        let manufacturing_date = request
            .manufacturing_date
            .unwrap_or(existing.manufacturing_date);
        let expiry_date = request.expiry_date.unwrap_or(existing.expiry_date);

        if expiry_date <= manufacturing_date {
            return Err(ServiceError::ValidationError(
                "Expiry date must be after manufacturing date".to_string(),
            ));
        }

        if let Some(code) = &request.batch_code {
            if code.len() < 3 {
                return Err(ServiceError::ValidationError(
                    "Batch code must be at least 3 characters".to_string(),
                ));
            }

            if *code != existing.batch_code {
                let duplicate = BatchEntity::find()
                    .filter(batch::Column::InventoryId.eq(existing.inventory_id))
                    .filter(batch::Column::BatchCode.eq(code.clone()))
                    .one(db)
                    .await
                    .map_err(ServiceError::db_error)?;

                if duplicate.is_some() {
                    return Err(ServiceError::Conflict(format!(
                        "Batch code '{}' already exists for this item",
                        code
                    )));
                }
            }
        }

        let mut active: batch::ActiveModel = existing.into();
        if let Some(code) = request.batch_code {
            active.batch_code = Set(code);
        }
        active.manufacturing_date = Set(manufacturing_date);
        active.expiry_date = Set(expiry_date);

        let updated = active.update(db).await.map_err(ServiceError::db_error)?;

        info!(batch_id = %batch_id, "Batch metadata updated");

        Ok(updated)
    }

    /// Removes an untouched batch and its ledger rows. Any consumed stock
    /// pins the batch forever: fulfillment rows reference it.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn delete_batch(&self, batch_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let existing = BatchEntity::find_by_id(batch_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        if existing.remaining_qty != existing.quantity {
            return Err(ServiceError::Conflict(format!(
                "Batch {} has been partially consumed and cannot be deleted",
                batch_id
            )));
        }

        let consumption_count = BatchMovementEntity::find()
            .filter(batch_movement::Column::BatchId.eq(batch_id))
            .filter(
                batch_movement::Column::MovementType.eq(MovementType::Consumption.as_str()),
            )
            .count(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if consumption_count > 0 {
            return Err(ServiceError::Conflict(format!(
                "Batch {} has consumption history and cannot be deleted",
                batch_id
            )));
        }

        BatchMovementEntity::delete_many()
            .filter(batch_movement::Column::BatchId.eq(batch_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        BatchEntity::delete_by_id(batch_id)
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(batch_id = %batch_id, "Batch deleted");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::BatchDeleted {
                    batch_id,
                    inventory_id: existing.inventory_id,
                })
                .await
            {
                warn!(error = %e, batch_id = %batch_id, "Failed to send batch deleted event");
            }
        }

        Ok(())
    }

    /// Fetches a single batch.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn get_batch(&self, batch_id: Uuid) -> Result<Option<batch::Model>, ServiceError> {
        let db = &*self.db_pool;

        BatchEntity::find_by_id(batch_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// All batches of an item, in no promised order.
    #[instrument(skip(self), fields(inventory_id = %inventory_id))]
    pub async fn get_batches_by_inventory_id(
        &self,
        inventory_id: Uuid,
    ) -> Result<Vec<batch::Model>, ServiceError> {
        let db = &*self.db_pool;

        BatchEntity::find()
            .filter(batch::Column::InventoryId.eq(inventory_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Expired batches that still hold stock, soonest-expired first. These
    /// need operator disposal; the allocator already ignores them.
    #[instrument(skip(self), fields(pharmacy_id = %pharmacy_id))]
    pub async fn get_expired_batches(
        &self,
        pharmacy_id: Uuid,
    ) -> Result<Vec<batch::Model>, ServiceError> {
        let db = &*self.db_pool;
        let today = Utc::now().date_naive();

        BatchEntity::find()
            .filter(batch::Column::PharmacyId.eq(pharmacy_id))
            .filter(batch::Column::ExpiryDate.lt(today))
            .filter(batch::Column::RemainingQty.gt(0))
            .order_by_asc(batch::Column::ExpiryDate)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Stocked batches expiring within the warning window, soonest first.
    #[instrument(skip(self), fields(pharmacy_id = %pharmacy_id, within_days = within_days))]
    pub async fn get_expiring_batches(
        &self,
        pharmacy_id: Uuid,
        within_days: i64,
    ) -> Result<Vec<batch::Model>, ServiceError> {
        let db = &*self.db_pool;
        let today = Utc::now().date_naive();
        let horizon = today + Duration::days(within_days);

        BatchEntity::find()
            .filter(batch::Column::PharmacyId.eq(pharmacy_id))
            .filter(batch::Column::ExpiryDate.gte(today))
            .filter(batch::Column::ExpiryDate.lte(horizon))
            .filter(batch::Column::RemainingQty.gt(0))
            .order_by_asc(batch::Column::ExpiryDate)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }
}
