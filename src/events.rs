use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Batch events
    BatchCreated {
        batch_id: Uuid,
        inventory_id: Uuid,
        quantity: i32,
        expiry_date: NaiveDate,
    },
    StockAdded {
        batch_id: Uuid,
        quantity: i32,
        new_remaining: i32,
    },
    StockAdjusted {
        batch_id: Uuid,
        delta: i32,
        new_remaining: i32,
    },
    BatchDeleted {
        batch_id: Uuid,
        inventory_id: Uuid,
    },

    // Consumption events
    StockConsumed {
        inventory_id: Uuid,
        order_id: Option<Uuid>,
        total_quantity: i32,
        batch_ids: Vec<Uuid>,
    },
    LowStockDetected {
        inventory_id: Uuid,
        available: i32,
        threshold: i32,
    },

    // Order events
    OrderPlaced(Uuid),
    OrderAccepted(Uuid),
    OrderRejected(Uuid),
    OrderCancelled(Uuid),
    OrderCompleted(Uuid),
    OrderFulfilled {
        order_id: Uuid,
        line_count: usize,
    },
}

// Function to process incoming events and distribute them to handlers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!("Received event: {:?}", event);

        match event {
            Event::OrderPlaced(order_id) => {
                if let Err(e) = handle_order_placed(order_id).await {
                    error!(
                        "Failed to handle order placed event: order_id={}, error={}",
                        order_id, e
                    );
                }
            }
            Event::OrderFulfilled {
                order_id,
                line_count,
            } => {
                if let Err(e) = handle_order_fulfilled(order_id, line_count).await {
                    error!(
                        "Failed to handle order fulfilled event: order_id={}, error={}",
                        order_id, e
                    );
                }
            }
            Event::StockConsumed {
                inventory_id,
                order_id,
                total_quantity,
                batch_ids,
            } => {
                if let Err(e) =
                    handle_stock_consumed(inventory_id, order_id, total_quantity, &batch_ids)
                        .await
                {
                    error!(
                        "Failed to handle stock consumed event: inventory_id={}, error={}",
                        inventory_id, e
                    );
                }
            }
            Event::LowStockDetected {
                inventory_id,
                available,
                threshold,
            } => {
                warn!(
                    "Low stock detected: inventory_id={}, available={}, threshold={}",
                    inventory_id, available, threshold
                );
            }
            _ => {
                info!("No specific handler for event: {:?}", event);
            }
        }
    }

    warn!("Event processing loop has ended");
}

// Handler functions for specific events
async fn handle_order_placed(order_id: Uuid) -> Result<(), String> {
    // Placed orders wait on pharmacy acceptance before any stock moves
    info!("Processing order placed event for order {}", order_id);
    Ok(())
}

async fn handle_order_fulfilled(order_id: Uuid, line_count: usize) -> Result<(), String> {
    info!(
        "Processing order fulfilled event for order {} ({} lines)",
        order_id, line_count
    );
    Ok(())
}

async fn handle_stock_consumed(
    inventory_id: Uuid,
    order_id: Option<Uuid>,
    total_quantity: i32,
    batch_ids: &[Uuid],
) -> Result<(), String> {
    info!(
        "Processing stock consumed event: inventory_id={}, order_id={:?}, quantity={}, batches={}",
        inventory_id,
        order_id,
        total_quantity,
        batch_ids.len()
    );
    Ok(())
}
