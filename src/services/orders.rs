use crate::{
    db::DbPool,
    entities::inventory_item::{self, Entity as InventoryItemEntity},
    entities::order::{
        self, AcceptanceStatus, ActiveModel as OrderActiveModel, Entity as OrderEntity,
        FulfillmentStatus, InitiatorType, OrderStatus,
    },
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineRequest {
    pub inventory_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub pharmacy_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub initiator_type: InitiatorType,
    pub acceptance_deadline: Option<DateTime<Utc>>,
    pub items: Vec<OrderLineRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Serialize)]
pub struct OrderListPage {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Order lifecycle up to and after fulfillment: placement with price
/// snapshots, the pharmacy acceptance step and the final hand-off.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Places an order. Line prices are snapshotted from the current item
    /// price, so later catalog edits leave existing orders untouched.
    #[instrument(skip(self, request), fields(pharmacy_id = %request.pharmacy_id, lines = request.items.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Order must contain at least one line".to_string(),
            ));
        }

        let mut seen_items = HashSet::new();
        for line in &request.items {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity for item {} must be positive",
                    line.inventory_id
                )));
            }

            if !seen_items.insert(line.inventory_id) {
                return Err(ServiceError::ValidationError(format!(
                    "Item {} appears in more than one line",
                    line.inventory_id
                )));
            }
        }

        if request.initiator_type == InitiatorType::Patient && request.patient_id.is_none() {
            return Err(ServiceError::ValidationError(
                "Patient-initiated orders require a patient id".to_string(),
            ));
        }

        if let Some(deadline) = request.acceptance_deadline {
            if deadline <= Utc::now() {
                return Err(ServiceError::ValidationError(
                    "Acceptance deadline must be in the future".to_string(),
                ));
            }
        }

        let db = &*self.db_pool;

        let item_ids: Vec<Uuid> = request.items.iter().map(|l| l.inventory_id).collect();
        let items_by_id: HashMap<Uuid, inventory_item::Model> = InventoryItemEntity::find()
            .filter(inventory_item::Column::Id.is_in(item_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        let mut total_price = Decimal::ZERO;
        for line in &request.items {
            let item = items_by_id.get(&line.inventory_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Inventory item {} not found", line.inventory_id))
            })?;

            if item.pharmacy_id != request.pharmacy_id {
                return Err(ServiceError::ValidationError(format!(
                    "Item {} does not belong to pharmacy {}",
                    line.inventory_id, request.pharmacy_id
                )));
            }

            total_price += item.price * Decimal::from(line.quantity);
        }

        let acceptance_status = match request.initiator_type {
            InitiatorType::Patient => AcceptanceStatus::Pending,
            InitiatorType::Pharmacy => AcceptanceStatus::Accepted,
        };

        let order_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_model = OrderActiveModel {
            id: Set(order_id),
            patient_id: Set(request.patient_id),
            pharmacy_id: Set(request.pharmacy_id),
            total_price: Set(total_price),
            status: Set(OrderStatus::Placed.as_str().to_string()),
            initiator_type: Set(request.initiator_type.as_str().to_string()),
            acceptance_status: Set(acceptance_status.as_str().to_string()),
            acceptance_deadline: Set(request.acceptance_deadline),
            fulfillment_status: Set(FulfillmentStatus::Pending.as_str().to_string()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to insert order");
            ServiceError::DatabaseError(e)
        })?;

        let mut line_models = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let item = &items_by_id[&line.inventory_id];

            let line_model = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                inventory_id: Set(line.inventory_id),
                quantity: Set(line.quantity),
                price_at_time: Set(item.price),
                created_at: Set(Utc::now()),
            }
            .insert(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to insert order line");
                ServiceError::DatabaseError(e)
            })?;

            line_models.push(line_model);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, total_price = %total_price, "Order placed");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderPlaced(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order placed event");
            }
        }

        Ok(OrderWithItems {
            order: order_model,
            items: line_models,
        })
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        let db = &*self.db_pool;

        OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order_with_items(
        &self,
        order_id: Uuid,
    ) -> Result<Option<OrderWithItems>, ServiceError> {
        let db = &*self.db_pool;

        let Some(order_model) = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
        else {
            return Ok(None);
        };

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(Some(OrderWithItems {
            order: order_model,
            items,
        }))
    }

    /// Pharmacy order history, newest first. Pages are 1-based.
    #[instrument(skip(self), fields(pharmacy_id = %pharmacy_id, page = page, per_page = per_page))]
    pub async fn list_orders(
        &self,
        pharmacy_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListPage, ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "Page numbers start at 1".to_string(),
            ));
        }
        if per_page == 0 {
            return Err(ServiceError::ValidationError(
                "Page size must be positive".to_string(),
            ));
        }

        let db = &*self.db_pool;

        let paginator = OrderEntity::find()
            .filter(order::Column::PharmacyId.eq(pharmacy_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let orders = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(OrderListPage {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Pharmacy accepts a pending order. Lapsed deadlines cannot be
    /// accepted past; the sweep or an explicit reject handles those.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn accept_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order_model = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order_model.status() == Some(OrderStatus::Cancelled) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} has been cancelled",
                order_id
            )));
        }

        if order_model.acceptance_status() != Some(AcceptanceStatus::Pending) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is not awaiting acceptance",
                order_id
            )));
        }

        if let Some(deadline) = order_model.acceptance_deadline {
            if deadline < Utc::now() {
                return Err(ServiceError::Conflict(format!(
                    "Acceptance deadline for order {} has passed",
                    order_id
                )));
            }
        }

        let mut active: OrderActiveModel = order_model.into();
        active.acceptance_status = Set(AcceptanceStatus::Accepted.as_str().to_string());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, "Order accepted");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderAccepted(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order accepted event");
            }
        }

        Ok(updated)
    }

    /// Pharmacy declines a pending order, which also cancels it.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn reject_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order_model = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order_model.acceptance_status() != Some(AcceptanceStatus::Pending) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is not awaiting acceptance",
                order_id
            )));
        }

        let mut active: OrderActiveModel = order_model.into();
        active.acceptance_status = Set(AcceptanceStatus::Rejected.as_str().to_string());
        active.status = Set(OrderStatus::Cancelled.as_str().to_string());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(
            order_id = %order_id,
            reason = reason.as_deref().unwrap_or("none"),
            "Order rejected"
        );

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderRejected(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order rejected event");
            }
        }

        Ok(updated)
    }

    /// Cancels an order before its stock has been fulfilled.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order_model = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order_model.fulfillment_status() == Some(FulfillmentStatus::Completed) {
            return Err(ServiceError::Conflict(format!(
                "Order {} has already been fulfilled and cannot be cancelled",
                order_id
            )));
        }

        if order_model.status() == Some(OrderStatus::Cancelled) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is already cancelled",
                order_id
            )));
        }

        let mut active: OrderActiveModel = order_model.into();
        active.status = Set(OrderStatus::Cancelled.as_str().to_string());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(
            order_id = %order_id,
            reason = reason.as_deref().unwrap_or("none"),
            "Order cancelled"
        );

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderCancelled(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order cancelled event");
            }
        }

        Ok(updated)
    }

    /// Marks a fulfilled order as handed over to the patient.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn complete_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order_model = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order_model.status() != Some(OrderStatus::Ready) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is not ready for hand-off",
                order_id
            )));
        }

        let mut active: OrderActiveModel = order_model.into();
        active.status = Set(OrderStatus::Complete.as_str().to_string());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, "Order completed");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderCompleted(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order completed event");
            }
        }

        Ok(updated)
    }

    /// Sweeps pending-acceptance orders whose deadline has passed into
    /// rejected + cancelled. Returns the number of orders swept.
    #[instrument(skip(self))]
    pub async fn expire_overdue_acceptances(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        use sea_orm::sea_query::Expr;

        let db = &*self.db_pool;

        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::AcceptanceStatus,
                Expr::value(AcceptanceStatus::Rejected.as_str()),
            )
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Cancelled.as_str()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::AcceptanceStatus.eq(AcceptanceStatus::Pending.as_str()))
            .filter(order::Column::Status.eq(OrderStatus::Placed.as_str()))
            .filter(order::Column::AcceptanceDeadline.is_not_null())
            .filter(order::Column::AcceptanceDeadline.lt(now))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected > 0 {
            info!(
                expired = result.rows_affected,
                "Overdue acceptance deadlines swept"
            );
        }

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sea_orm::DatabaseConnection;

    fn service() -> OrderService {
        OrderService::new(Arc::new(DatabaseConnection::Disconnected), None)
    }

    fn valid_request() -> CreateOrderRequest {
        CreateOrderRequest {
            pharmacy_id: Uuid::new_v4(),
            patient_id: Some(Uuid::new_v4()),
            initiator_type: InitiatorType::Patient,
            acceptance_deadline: None,
            items: vec![OrderLineRequest {
                inventory_id: Uuid::new_v4(),
                quantity: 2,
            }],
        }
    }

    #[tokio::test]
    async fn create_order_rejects_empty_lines() {
        let mut request = valid_request();
        request.items.clear();

        let err = service().create_order(request).await.unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn create_order_rejects_non_positive_quantity() {
        let mut request = valid_request();
        request.items[0].quantity = 0;

        let err = service().create_order(request).await.unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn create_order_rejects_duplicate_item_lines() {
        let mut request = valid_request();
        let duplicated = request.items[0].clone();
        request.items.push(duplicated);

        let err = service().create_order(request).await.unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn create_order_requires_patient_for_patient_initiated() {
        let mut request = valid_request();
        request.patient_id = None;

        let err = service().create_order(request).await.unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn create_order_rejects_past_deadline() {
        let mut request = valid_request();
        request.acceptance_deadline = Some(Utc::now() - chrono::Duration::hours(1));

        let err = service().create_order(request).await.unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn list_orders_rejects_page_zero() {
        let err = service()
            .list_orders(Uuid::new_v4(), 0, 20)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }
}
