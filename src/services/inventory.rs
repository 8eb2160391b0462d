use crate::{
    config::StockConfig,
    db::DbPool,
    entities::batch::{self, Entity as BatchEntity},
    entities::inventory_item::{self, Entity as InventoryItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateItemRequest {
    pub pharmacy_id: Uuid,
    #[validate(length(min = 1, message = "Item name cannot be empty"))]
    pub name: String,
    pub brand_name: Option<String>,
    pub form: Option<String>,
    pub price: Decimal,
    pub stock: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LowStockSeverity {
    Low,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct LowStockAlert {
    pub item: inventory_item::Model,
    pub available: i32,
    pub severity: LowStockSeverity,
}

/// Catalog operations plus the batch-derived availability reads the rest
/// of the engine builds on.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, request), fields(pharmacy_id = %request.pharmacy_id, name = %request.name))]
    pub async fn create_item(
        &self,
        request: CreateItemRequest,
    ) -> Result<inventory_item::Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        if request.price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Price cannot be negative".to_string(),
            ));
        }

        let stock = request.stock.unwrap_or(0);
        if stock < 0 {
            return Err(ServiceError::ValidationError(
                "Stock cannot be negative".to_string(),
            ));
        }

        let db = &*self.db_pool;

        let item = inventory_item::ActiveModel {
            pharmacy_id: Set(request.pharmacy_id),
            name: Set(request.name),
            brand_name: Set(request.brand_name),
            form: Set(request.form),
            price: Set(request.price),
            stock: Set(stock),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(inventory_id = %item.id, "Inventory item created");

        Ok(item)
    }

    #[instrument(skip(self), fields(inventory_id = %inventory_id))]
    pub async fn get_item(
        &self,
        inventory_id: Uuid,
    ) -> Result<Option<inventory_item::Model>, ServiceError> {
        let db = &*self.db_pool;

        InventoryItemEntity::find_by_id(inventory_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self), fields(pharmacy_id = %pharmacy_id))]
    pub async fn list_items(
        &self,
        pharmacy_id: Uuid,
    ) -> Result<Vec<inventory_item::Model>, ServiceError> {
        let db = &*self.db_pool;

        InventoryItemEntity::find()
            .filter(inventory_item::Column::PharmacyId.eq(pharmacy_id))
            .order_by_asc(inventory_item::Column::Name)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Sellable quantity for an item. Batch-tracked items sum remaining_qty
    /// over non-expired batches; items without batch rows fall back to the
    /// denormalized `stock` column.
    #[instrument(skip(self), fields(inventory_id = %inventory_id))]
    pub async fn available_stock(&self, inventory_id: Uuid) -> Result<i32, ServiceError> {
        let db = &*self.db_pool;

        let item = InventoryItemEntity::find_by_id(inventory_id)
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

        if batches.is_empty() {
            return Ok(item.stock);
        }

        let today = Utc::now().date_naive();
        Ok(batches
            .iter()
            .filter(|b| !b.is_expired(today))
            .map(|b| b.remaining_qty)
            .sum())
    }

    /// Copies the batch-derived total into the item's `stock` column. This
    /// never happens implicitly; consumption touches batches only.
    #[instrument(skip(self), fields(inventory_id = %inventory_id))]
    pub async fn reconcile_item_stock(
        &self,
        inventory_id: Uuid,
    ) -> Result<inventory_item::Model, ServiceError> {
        let db = &*self.db_pool;

        let item = InventoryItemEntity::find_by_id(inventory_id)
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

        if batches.is_empty() {
            return Err(ServiceError::InvalidOperation(format!(
                "Item {} has no batches to reconcile from",
                inventory_id
            )));
        }

        let today = Utc::now().date_naive();
        let total: i32 = batches
            .iter()
            .filter(|b| !b.is_expired(today))
            .map(|b| b.remaining_qty)
            .sum();

        let previous = item.stock;
        let mut active: inventory_item::ActiveModel = item.into();
        active.stock = Set(total);

        let updated = active.update(db).await.map_err(ServiceError::db_error)?;

        info!(
            inventory_id = %inventory_id,
            previous_stock = previous,
            reconciled_stock = total,
            "Item stock reconciled from batches"
        );

        Ok(updated)
    }

    /// Batch-tracked items at or below the configured thresholds, worst
    /// first. Items without batch rows are not yet under batch tracking and
    /// stay out of the report.
    #[instrument(skip(self, thresholds), fields(pharmacy_id = %pharmacy_id))]
    pub async fn low_stock_report(
        &self,
        pharmacy_id: Uuid,
        thresholds: &StockConfig,
    ) -> Result<Vec<LowStockAlert>, ServiceError> {
        let db = &*self.db_pool;

        let items = InventoryItemEntity::find()
            .filter(inventory_item::Column::PharmacyId.eq(pharmacy_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let batches = BatchEntity::find()
            .filter(batch::Column::PharmacyId.eq(pharmacy_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let today = Utc::now().date_naive();
        let mut available_by_item: HashMap<Uuid, i32> = HashMap::new();
        for b in &batches {
            let entry = available_by_item.entry(b.inventory_id).or_insert(0);
            if !b.is_expired(today) {
                *entry += b.remaining_qty;
            }
        }

        let mut alerts = Vec::new();
        for item in items {
            let Some(&available) = available_by_item.get(&item.id) else {
                continue;
            };

            let severity = if available <= thresholds.critical_stock_threshold {
                LowStockSeverity::Critical
            } else if available <= thresholds.low_stock_threshold {
                LowStockSeverity::Low
            } else {
                continue;
            };

            alerts.push(LowStockAlert {
                item,
                available,
                severity,
            });
        }

        alerts.sort_by_key(|a| a.available);

        if let Some(event_sender) = &self.event_sender {
            for alert in &alerts {
                let threshold = match alert.severity {
                    LowStockSeverity::Critical => thresholds.critical_stock_threshold,
                    LowStockSeverity::Low => thresholds.low_stock_threshold,
                };
                if let Err(e) = event_sender
                    .send(Event::LowStockDetected {
                        inventory_id: alert.item.id,
                        available: alert.available,
                        threshold,
                    })
                    .await
                {
                    warn!(error = %e, inventory_id = %alert.item.id, "Failed to send low stock event");
                }
            }
        }

        Ok(alerts)
    }
}
