pub mod batch;
pub mod batch_movement;
pub mod inventory_item;
pub mod order;
pub mod order_fulfillment;
pub mod order_item;
