use crate::{
    db::DbPool,
    entities::batch::{self, Entity as BatchEntity},
    entities::batch_movement::MovementType,
    entities::inventory_item::Entity as InventoryItemEntity,
    errors::ServiceError,
    events::{Event, EventSender},
    services::allocation::{plan_fefo, AllocationPlan, BatchAllocation},
    services::movements::{MovementLedger, NewMovement},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ColumnTrait, EntityTrait, QueryFilter, TransactionError, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One batch decrement that made it into the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct CommittedAllocation {
    pub batch_id: Uuid,
    pub quantity: i32,
    pub movement_id: Uuid,
}

/// Turns allocation plans into committed stock decrements. All decrements
/// of a call land in one transaction together with their `consumption`
/// movements; the per-batch guard `remaining_qty >= qty` runs inside the
/// UPDATE, so concurrent callers cannot drive a batch negative.
#[derive(Clone)]
pub struct ConsumptionService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl ConsumptionService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Consumes stock for an item along the expiry-ordered plan. A guard
    /// miss at commit time means another writer got there first: the
    /// transaction rolls back, the plan is rebuilt from fresh reads and
    /// committed once more. A second miss reports the stock as gone.
    #[instrument(skip(self), fields(inventory_id = %inventory_id, quantity = quantity))]
    pub async fn consume(
        &self,
        inventory_id: Uuid,
        quantity: i32,
        order_id: Option<Uuid>,
        performed_by: Option<Uuid>,
    ) -> Result<Vec<CommittedAllocation>, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Consumed quantity must be positive".to_string(),
            ));
        }

        let plan = self.fefo_plan(inventory_id, quantity).await?;
        if !plan.is_satisfied() {
            return Err(Self::shortfall_error(inventory_id, &plan));
        }

        let committed = match self
            .commit_allocations(&plan.allocations, order_id, performed_by)
            .await
        {
            Ok(committed) => committed,
            Err(ServiceError::Conflict(_)) => {
                counter!("rxstock_consumption.stale_plans", 1);
                warn!(inventory_id = %inventory_id, "Allocation plan went stale, replanning");

                let plan = self.fefo_plan(inventory_id, quantity).await?;
                if !plan.is_satisfied() {
                    return Err(Self::shortfall_error(inventory_id, &plan));
                }

                match self
                    .commit_allocations(&plan.allocations, order_id, performed_by)
                    .await
                {
                    Ok(committed) => committed,
                    Err(ServiceError::Conflict(message)) => {
                        return Err(ServiceError::InsufficientStock(message));
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        counter!("rxstock_consumption.commits", 1);
        info!(
            inventory_id = %inventory_id,
            quantity = quantity,
            batches = committed.len(),
            "Stock consumed"
        );

        self.send_consumed_event(inventory_id, order_id, quantity, &committed)
            .await;

        Ok(committed)
    }

    /// Consumes stock along an operator-supplied batch list. The operator
    /// may deliberately pick expired batches; what they may not get is a
    /// silent substitution, so a guard miss here fails instead of
    /// replanning.
    #[instrument(skip(self, allocations), fields(inventory_id = %inventory_id, batches = allocations.len()))]
    pub async fn consume_allocations(
        &self,
        inventory_id: Uuid,
        allocations: &[BatchAllocation],
        order_id: Option<Uuid>,
        performed_by: Option<Uuid>,
    ) -> Result<Vec<CommittedAllocation>, ServiceError> {
        if allocations.is_empty() {
            return Err(ServiceError::ValidationError(
                "At least one batch allocation is required".to_string(),
            ));
        }

        for allocation in allocations {
            if allocation.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Allocation for batch {} must be positive",
                    allocation.batch_id
                )));
            }
        }

        let db = &*self.db_pool;

        for allocation in allocations {
            let batch_row = BatchEntity::find_by_id(allocation.batch_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Batch {} not found", allocation.batch_id))
                })?;

            if batch_row.inventory_id != inventory_id {
                return Err(ServiceError::ValidationError(format!(
                    "Batch {} does not belong to item {}",
                    allocation.batch_id, inventory_id
                )));
            }
        }

        let committed = match self
            .commit_allocations(allocations, order_id, performed_by)
            .await
        {
            Ok(committed) => committed,
            Err(ServiceError::Conflict(message)) => {
                return Err(ServiceError::InsufficientStock(message));
            }
            Err(e) => return Err(e),
        };

        counter!("rxstock_consumption.commits", 1);
        let total_quantity: i32 = committed.iter().map(|c| c.quantity).sum();
        info!(
            inventory_id = %inventory_id,
            quantity = total_quantity,
            batches = committed.len(),
            "Stock consumed via manual allocations"
        );

        self.send_consumed_event(inventory_id, order_id, total_quantity, &committed)
            .await;

        Ok(committed)
    }

    /// Item-exists check plus a plan over current batch rows.
    async fn fefo_plan(
        &self,
        inventory_id: Uuid,
        quantity: i32,
    ) -> Result<AllocationPlan, ServiceError> {
        let db = &*self.db_pool;

        InventoryItemEntity::find_by_id(inventory_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Inventory item {} not found", inventory_id))
            })?;

        let batches = BatchEntity::find()
            .filter(batch::Column::InventoryId.eq(inventory_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(plan_fefo(&batches, quantity, Utc::now().date_naive()))
    }

    /// One transaction for the whole list: guarded decrement plus ledger
    /// movement per batch. A guard miss surfaces as Conflict and rolls
    /// everything back; callers decide whether to replan or give up.
    async fn commit_allocations(
        &self,
        allocations: &[BatchAllocation],
        order_id: Option<Uuid>,
        performed_by: Option<Uuid>,
    ) -> Result<Vec<CommittedAllocation>, ServiceError> {
        use sea_orm::sea_query::Expr;

        let db = &*self.db_pool;
        let allocations = allocations.to_vec();

        db.transaction::<_, Vec<CommittedAllocation>, ServiceError>(move |txn| {
            Box::pin(async move {
                let mut committed = Vec::with_capacity(allocations.len());

                for allocation in &allocations {
                    let update = BatchEntity::update_many()
                        .col_expr(
                            batch::Column::RemainingQty,
                            Expr::col(batch::Column::RemainingQty).sub(allocation.quantity),
                        )
                        .col_expr(batch::Column::UpdatedAt, Expr::value(Utc::now()))
                        .filter(batch::Column::Id.eq(allocation.batch_id))
                        .filter(batch::Column::RemainingQty.gte(allocation.quantity))
                        .exec(txn)
                        .await
                        .map_err(ServiceError::db_error)?;

                    if update.rows_affected == 0 {
                        return Err(ServiceError::Conflict(format!(
                            "Batch {} no longer holds {} units",
                            allocation.batch_id, allocation.quantity
                        )));
                    }

                    let movement = MovementLedger::record(
                        txn,
                        NewMovement {
                            batch_id: allocation.batch_id,
                            movement_type: MovementType::Consumption,
                            quantity_delta: -allocation.quantity,
                            order_id,
                            performed_by,
                        },
                    )
                    .await?;

                    committed.push(CommittedAllocation {
                        batch_id: allocation.batch_id,
                        quantity: allocation.quantity,
                        movement_id: movement.id,
                    });
                }

                Ok(committed)
            })
        })
        .await
        .map_err(|e| match e {
            TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
            TransactionError::Transaction(service_err) => service_err,
        })
    }

    async fn send_consumed_event(
        &self,
        inventory_id: Uuid,
        order_id: Option<Uuid>,
        total_quantity: i32,
        committed: &[CommittedAllocation],
    ) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::StockConsumed {
                    inventory_id,
                    order_id,
                    total_quantity,
                    batch_ids: committed.iter().map(|c| c.batch_id).collect(),
                })
                .await
            {
                warn!(error = %e, inventory_id = %inventory_id, "Failed to send stock consumed event");
            }
        }
    }

    fn shortfall_error(inventory_id: Uuid, plan: &AllocationPlan) -> ServiceError {
        ServiceError::InsufficientStock(format!(
            "Insufficient stock for item {}: requested {}, available {}",
            inventory_id,
            plan.requested_qty,
            plan.allocated_qty()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sea_orm::DatabaseConnection;

    fn service() -> ConsumptionService {
        ConsumptionService::new(Arc::new(DatabaseConnection::Disconnected), None)
    }

    #[tokio::test]
    async fn consume_rejects_non_positive_quantity() {
        let err = service()
            .consume(Uuid::new_v4(), 0, None, None)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));

        let err = service()
            .consume(Uuid::new_v4(), -5, None, None)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn consume_allocations_rejects_empty_list() {
        let err = service()
            .consume_allocations(Uuid::new_v4(), &[], None, None)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn consume_allocations_rejects_non_positive_quantity() {
        let allocations = vec![BatchAllocation {
            batch_id: Uuid::new_v4(),
            quantity: 0,
        }];

        let err = service()
            .consume_allocations(Uuid::new_v4(), &allocations, None, None)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }
}
