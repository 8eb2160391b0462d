// Batch store and stock movement
pub mod batches;
pub mod movements;

// Allocation and consumption
pub mod allocation;
pub mod consumption;

// Catalog and availability
pub mod inventory;

// Order lifecycle and fulfillment
pub mod fulfillment;
pub mod orders;

use crate::db::DbPool;
use crate::events::EventSender;
use std::sync::Arc;

/// Services layer that encapsulates the engine's business logic for
/// embedding applications.
#[derive(Clone)]
pub struct AppServices {
    pub inventory: Arc<inventory::InventoryService>,
    pub batches: Arc<batches::BatchService>,
    pub movements: Arc<movements::MovementLedger>,
    pub allocator: Arc<allocation::FefoAllocator>,
    pub consumption: Arc<consumption::ConsumptionService>,
    pub orders: Arc<orders::OrderService>,
    pub fulfillment: Arc<fulfillment::FulfillmentService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            inventory: Arc::new(inventory::InventoryService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            batches: Arc::new(batches::BatchService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            movements: Arc::new(movements::MovementLedger::new(db_pool.clone())),
            allocator: Arc::new(allocation::FefoAllocator::new(db_pool.clone())),
            consumption: Arc::new(consumption::ConsumptionService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            orders: Arc::new(orders::OrderService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            fulfillment: Arc::new(fulfillment::FulfillmentService::new(db_pool, event_sender)),
        }
    }
}
