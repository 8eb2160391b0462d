use crate::{
    db::DbPool,
    entities::batch::{self, Entity as BatchEntity},
    entities::inventory_item::Entity as InventoryItemEntity,
    errors::ServiceError,
};
use chrono::{NaiveDate, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// One slice of an allocation plan: take `quantity` units from `batch_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocation {
    pub batch_id: Uuid,
    pub quantity: i32,
}

/// Outcome of planning a withdrawal. `shortfall` is how much of the
/// request no eligible batch could cover.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationPlan {
    pub allocations: Vec<BatchAllocation>,
    pub requested_qty: i32,
    pub shortfall: i32,
}

impl AllocationPlan {
    pub fn is_satisfied(&self) -> bool {
        self.shortfall == 0
    }

    pub fn allocated_qty(&self) -> i32 {
        self.requested_qty - self.shortfall
    }
}

/// Plans a withdrawal against the given batches, soonest expiry first.
///
/// Expired and drained batches never participate. Ties on expiry date fall
/// back to creation order, so equal-dated batches drain oldest first and
/// repeated calls over unchanged stock produce identical plans. The greedy
/// sweep is exact for this objective: taking anything but the maximum from
/// the soonest-expiring batch could only move quantity onto later expiries.
pub fn plan_fefo(
    batches: &[batch::Model],
    requested_qty: i32,
    today: NaiveDate,
) -> AllocationPlan {
    let mut usable: Vec<&batch::Model> =
        batches.iter().filter(|b| b.is_usable(today)).collect();
    usable.sort_by(|a, b| {
        a.expiry_date
            .cmp(&b.expiry_date)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut allocations = Vec::new();
    let mut remaining = requested_qty;

    for batch in usable {
        if remaining <= 0 {
            break;
        }

        let take = remaining.min(batch.remaining_qty);
        allocations.push(BatchAllocation {
            batch_id: batch.id,
            quantity: take,
        });
        remaining -= take;
    }

    AllocationPlan {
        allocations,
        requested_qty,
        shortfall: remaining.max(0),
    }
}

/// Read-only planning service over the batch store. Plans never reserve or
/// mutate stock; only the consumption path changes quantities.
#[derive(Clone)]
pub struct FefoAllocator {
    db_pool: Arc<DbPool>,
}

impl FefoAllocator {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Plans a withdrawal of `requested_qty` units against current stock.
    #[instrument(skip(self), fields(inventory_id = %inventory_id, requested_qty = requested_qty))]
    pub async fn plan(
        &self,
        inventory_id: Uuid,
        requested_qty: i32,
    ) -> Result<AllocationPlan, ServiceError> {
        if requested_qty <= 0 {
            return Err(ServiceError::ValidationError(
                "Requested quantity must be positive".to_string(),
            ));
        }

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

        Ok(plan_fefo(&batches, requested_qty, Utc::now().date_naive()))
    }
}
