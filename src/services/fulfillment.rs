use crate::{
    db::DbPool,
    entities::batch::{self, Entity as BatchEntity},
    entities::batch_movement::MovementType,
    entities::order::{
        self, AcceptanceStatus, Entity as OrderEntity, FulfillmentStatus, OrderStatus,
    },
    entities::order_fulfillment::{self, Entity as OrderFulfillmentEntity},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::allocation::{plan_fefo, BatchAllocation},
    services::movements::{MovementLedger, NewMovement},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionError,
    TransactionTrait,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Operator-chosen batches per order line, keyed by order_item id. Lines
/// absent from the map are planned automatically.
pub type ManualAllocations = HashMap<Uuid, Vec<BatchAllocation>>;

#[derive(Debug, Serialize)]
pub struct FulfillmentOutcome {
    pub order: order::Model,
    pub fulfillments: Vec<order_fulfillment::Model>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineProgress {
    pub inventory_id: Uuid,
    pub requested_qty: i32,
    pub fulfilled_qty: i32,
}

#[derive(Debug, Clone)]
struct LinePlan {
    inventory_id: Uuid,
    line_quantity: i32,
    allocations: Vec<BatchAllocation>,
    manual: bool,
}

/// Drives a whole order through stock consumption. Every line is resolved
/// to batches up front, then all decrements, movements, fulfillment rows
/// and the order status flip commit in one transaction; if any line cannot
/// be covered, no stock moves at all.
#[derive(Clone)]
pub struct FulfillmentService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl FulfillmentService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Fulfills every line of an order. Manual allocations must cover their
    /// line exactly and are never substituted; automatically planned lines
    /// are replanned once if another writer drains a batch mid-flight.
    #[instrument(skip(self, manual), fields(order_id = %order_id, manual_lines = manual.len()))]
    pub async fn fulfill_order(
        &self,
        order_id: Uuid,
        fulfilled_by: Option<Uuid>,
        manual: ManualAllocations,
    ) -> Result<FulfillmentOutcome, ServiceError> {
        let (_, items) = self.load_fulfillable(order_id).await?;
        let plans = self.plan_lines(&items, &manual).await?;

        let (order_model, fulfillments) = match self
            .commit_plan(order_id, fulfilled_by, &plans)
            .await
        {
            Ok(committed) => committed,
            Err(ServiceError::Conflict(_)) => {
                counter!("rxstock_fulfillment.stale_plans", 1);
                warn!(order_id = %order_id, "Fulfillment plan went stale, replanning");

                let (_, items) = self.load_fulfillable(order_id).await?;
                let plans = self.plan_lines(&items, &manual).await?;

                match self.commit_plan(order_id, fulfilled_by, &plans).await {
                    Ok(committed) => committed,
                    Err(ServiceError::Conflict(message)) => {
                        return Err(ServiceError::InsufficientStock(message));
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        counter!("rxstock_fulfillment.commits", 1);
        info!(
            order_id = %order_id,
            lines = items.len(),
            fulfillment_rows = fulfillments.len(),
            "Order fulfilled"
        );

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::OrderFulfilled {
                    order_id,
                    line_count: items.len(),
                })
                .await
            {
                warn!(error = %e, order_id = %order_id, "Failed to send order fulfilled event");
            }
        }

        Ok(FulfillmentOutcome {
            order: order_model,
            fulfillments,
        })
    }

    /// Fulfillment audit rows for an order, oldest first.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_fulfillments(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_fulfillment::Model>, ServiceError> {
        let db = &*self.db_pool;

        OrderFulfillmentEntity::find()
            .filter(order_fulfillment::Column::OrderId.eq(order_id))
            .order_by_asc(order_fulfillment::Column::CreatedAt)
            .order_by_asc(order_fulfillment::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Requested vs fulfilled per order line, in line order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn fulfillment_progress(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<LineProgress>, ServiceError> {
        let db = &*self.db_pool;

        OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let fulfillments = OrderFulfillmentEntity::find()
            .filter(order_fulfillment::Column::OrderId.eq(order_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut fulfilled_by_item: HashMap<Uuid, i32> = HashMap::new();
        for row in &fulfillments {
            *fulfilled_by_item.entry(row.inventory_id).or_insert(0) += row.fulfilled_qty;
        }

        Ok(items
            .into_iter()
            .map(|line| LineProgress {
                inventory_id: line.inventory_id,
                requested_qty: line.quantity,
                fulfilled_qty: fulfilled_by_item
                    .get(&line.inventory_id)
                    .copied()
                    .unwrap_or(0),
            })
            .collect())
    }

    /// Fetches the order and its lines, rejecting states that must not be
    /// fulfilled.
    async fn load_fulfillable(
        &self,
        order_id: Uuid,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let db = &*self.db_pool;

        let order_model = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order_model.status() == Some(OrderStatus::Cancelled) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} has been cancelled",
                order_id
            )));
        }

        if order_model.fulfillment_status() == Some(FulfillmentStatus::Completed) {
            return Err(ServiceError::Conflict(format!(
                "Order {} has already been fulfilled",
                order_id
            )));
        }

        if order_model.acceptance_status() != Some(AcceptanceStatus::Accepted) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} has not been accepted",
                order_id
            )));
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        if items.is_empty() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} has no lines",
                order_id
            )));
        }

        Ok((order_model, items))
    }

    /// Resolves every line to concrete batch quantities without writing
    /// anything. Manual lines are validated against the operator's exact
    /// choice; the rest get a fresh expiry-ordered plan.
    async fn plan_lines(
        &self,
        items: &[order_item::Model],
        manual: &ManualAllocations,
    ) -> Result<Vec<LinePlan>, ServiceError> {
        let db = &*self.db_pool;

        let line_ids: HashSet<Uuid> = items.iter().map(|l| l.id).collect();
        for key in manual.keys() {
            if !line_ids.contains(key) {
                return Err(ServiceError::ValidationError(format!(
                    "Manual allocations reference unknown order line {}",
                    key
                )));
            }
        }

        let today = Utc::now().date_naive();
        let mut plans = Vec::with_capacity(items.len());

        for line in items {
            if let Some(allocations) = manual.get(&line.id) {
                if allocations.is_empty() {
                    return Err(ServiceError::ValidationError(format!(
                        "Manual allocations for item {} are empty",
                        line.inventory_id
                    )));
                }

                let mut seen = HashSet::new();
                let mut total: i64 = 0;

                for allocation in allocations {
                    if allocation.quantity <= 0 {
                        return Err(ServiceError::ValidationError(format!(
                            "Allocation for batch {} must be positive",
                            allocation.batch_id
                        )));
                    }

                    if !seen.insert(allocation.batch_id) {
                        return Err(ServiceError::ValidationError(format!(
                            "Batch {} listed twice for item {}",
                            allocation.batch_id, line.inventory_id
                        )));
                    }

                    let batch_row = BatchEntity::find_by_id(allocation.batch_id)
                        .one(db)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "Batch {} not found",
                                allocation.batch_id
                            ))
                        })?;

                    if batch_row.inventory_id != line.inventory_id {
                        return Err(ServiceError::ValidationError(format!(
                            "Batch {} does not belong to item {}",
                            allocation.batch_id, line.inventory_id
                        )));
                    }

                    total += i64::from(allocation.quantity);
                }

                if total != i64::from(line.quantity) {
                    return Err(ServiceError::ValidationError(format!(
                        "Manual allocations for item {} total {} but the line needs {}",
                        line.inventory_id, total, line.quantity
                    )));
                }

                plans.push(LinePlan {
                    inventory_id: line.inventory_id,
                    line_quantity: line.quantity,
                    allocations: allocations.clone(),
                    manual: true,
                });
            } else {
                let batches = BatchEntity::find()
                    .filter(batch::Column::InventoryId.eq(line.inventory_id))
                    .all(db)
                    .await
                    .map_err(ServiceError::db_error)?;

                let plan = plan_fefo(&batches, line.quantity, today);
                if !plan.is_satisfied() {
                    return Err(ServiceError::InsufficientStock(format!(
                        "Insufficient stock for item {}: requested {}, available {}",
                        line.inventory_id,
                        plan.requested_qty,
                        plan.allocated_qty()
                    )));
                }

                plans.push(LinePlan {
                    inventory_id: line.inventory_id,
                    line_quantity: line.quantity,
                    allocations: plan.allocations,
                    manual: false,
                });
            }
        }

        Ok(plans)
    }

    /// One transaction for the whole order: per allocation a guarded batch
    /// decrement, its `consumption` movement and a fulfillment row, then
    /// the order flips to fulfilled + ready. A guard miss on an
    /// automatically planned line surfaces as Conflict for the caller to
    /// replan; a miss on a manual line is final.
    async fn commit_plan(
        &self,
        order_id: Uuid,
        fulfilled_by: Option<Uuid>,
        plans: &[LinePlan],
    ) -> Result<(order::Model, Vec<order_fulfillment::Model>), ServiceError> {
        use sea_orm::sea_query::Expr;

        let db = &*self.db_pool;
        let plans = plans.to_vec();

        db.transaction::<_, (order::Model, Vec<order_fulfillment::Model>), ServiceError>(
            move |txn| {
                Box::pin(async move {
                    let mut fulfillments = Vec::new();

                    for plan in &plans {
                        for allocation in &plan.allocations {
                            let update = BatchEntity::update_many()
                                .col_expr(
                                    batch::Column::RemainingQty,
                                    Expr::col(batch::Column::RemainingQty)
                                        .sub(allocation.quantity),
                                )
                                .col_expr(batch::Column::UpdatedAt, Expr::value(Utc::now()))
                                .filter(batch::Column::Id.eq(allocation.batch_id))
                                .filter(batch::Column::RemainingQty.gte(allocation.quantity))
                                .exec(txn)
                                .await
                                .map_err(ServiceError::db_error)?;

                            if update.rows_affected == 0 {
                                let message = format!(
                                    "Batch {} no longer holds {} units for item {}",
                                    allocation.batch_id, allocation.quantity, plan.inventory_id
                                );
                                return Err(if plan.manual {
                                    ServiceError::InsufficientStock(message)
                                } else {
                                    ServiceError::Conflict(message)
                                });
                            }

                            MovementLedger::record(
                                txn,
                                NewMovement {
                                    batch_id: allocation.batch_id,
                                    movement_type: MovementType::Consumption,
                                    quantity_delta: -allocation.quantity,
                                    order_id: Some(order_id),
                                    performed_by: fulfilled_by,
                                },
                            )
                            .await?;

                            let row = order_fulfillment::ActiveModel {
                                id: Set(Uuid::new_v4()),
                                order_id: Set(order_id),
                                inventory_id: Set(plan.inventory_id),
                                batch_id: Set(allocation.batch_id),
                                requested_qty: Set(plan.line_quantity),
                                fulfilled_qty: Set(allocation.quantity),
                                notes: Set(None),
                                fulfilled_by: Set(fulfilled_by),
                                created_at: Set(Utc::now()),
                            }
                            .insert(txn)
                            .await
                            .map_err(ServiceError::db_error)?;

                            fulfillments.push(row);
                        }
                    }

                    let order_update = OrderEntity::update_many()
                        .col_expr(
                            order::Column::FulfillmentStatus,
                            Expr::value(FulfillmentStatus::Completed.as_str()),
                        )
                        .col_expr(
                            order::Column::Status,
                            Expr::value(OrderStatus::Ready.as_str()),
                        )
                        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                        .filter(order::Column::Id.eq(order_id))
                        .filter(
                            order::Column::FulfillmentStatus
                                .ne(FulfillmentStatus::Completed.as_str()),
                        )
                        .exec(txn)
                        .await
                        .map_err(ServiceError::db_error)?;

                    if order_update.rows_affected == 0 {
                        return Err(ServiceError::Conflict(format!(
                            "Order {} has already been fulfilled",
                            order_id
                        )));
                    }

                    let order_model = OrderEntity::find_by_id(order_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Order {} not found", order_id))
                        })?;

                    Ok((order_model, fulfillments))
                })
            },
        )
        .await
        .map_err(|e| match e {
            TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
            TransactionError::Transaction(service_err) => service_err,
        })
    }
}
