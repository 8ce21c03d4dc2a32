use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::stages::Stage;

/// Events emitted by the pipeline services after their transaction commits.
///
/// Events are advisory. Failure to deliver one never rolls back the
/// store mutation that produced it, which is why services send through
/// [`EventSender::send_or_log`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Stock ledger events
    StockItemCreated {
        stock_item_id: i64,
        part_number: String,
    },
    StockReceived {
        stock_item_id: i64,
        quantity: i64,
        available: i64,
    },
    StockAdjusted {
        stock_item_id: i64,
        quantity: i64,
        reason: String,
    },
    LowStockDetected {
        stock_item_id: i64,
        available: i64,
        threshold: i64,
    },

    // Cart events
    ItemAddedToCart {
        user_id: i64,
        stock_item_id: i64,
        quantity: i64,
    },
    ItemRemovedFromCart {
        user_id: i64,
        stock_item_id: i64,
        quantity: i64,
    },

    // Order pipeline events
    OrderSubmitted {
        order_id: String,
        user_id: i64,
        line_count: usize,
    },
    OrderRouted {
        order_id: String,
        consumer: Stage,
        line_count: usize,
    },
    ServiceRoutedToCashier {
        order_id: String,
        line_count: usize,
    },
    ServiceReturnedToStock {
        order_id: String,
        quantity: i64,
    },
    PaymentRecorded {
        order_id: String,
        total_amount: Decimal,
        payment_method: String,
    },
    OrderCancelled {
        order_id: String,
        reason: Option<String>,
        quantity_restocked: i64,
    },
}

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

    /// Sends an event, logging delivery failure instead of surfacing it.
    ///
    /// Used after a transaction has committed, where the mutation must not
    /// be reported as failed just because the event channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event.clone()).await {
            error!("Failed to send event {:?}: {}", event, e);
        }
    }
}

// Trait seam for pluggable event consumers. Handlers implementing this
// trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

// Drains the event channel and dispatches each event to its handler.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let event_id = Uuid::new_v4();
        info!(%event_id, "Received event: {:?}", event);

        match event {
            Event::LowStockDetected {
                stock_item_id,
                available,
                threshold,
            } => {
                if let Err(e) = handle_low_stock(stock_item_id, available, threshold).await {
                    error!(
                        "Failed to handle low stock event: stock_item_id={}, error={}",
                        stock_item_id, e
                    );
                }
            }
            Event::OrderSubmitted {
                ref order_id,
                user_id,
                line_count,
            } => {
                info!(
                    "Order submitted: order_id={}, user_id={}, lines={}",
                    order_id, user_id, line_count
                );
            }
            Event::PaymentRecorded {
                ref order_id,
                total_amount,
                ref payment_method,
            } => {
                info!(
                    "Payment recorded: order_id={}, total={}, method={}",
                    order_id, total_amount, payment_method
                );
            }
            Event::OrderCancelled {
                ref order_id,
                ref reason,
                quantity_restocked,
            } => {
                warn!(
                    "Order cancelled: order_id={}, reason={:?}, restocked={}",
                    order_id, reason, quantity_restocked
                );
            }
            other => {
                info!("Event processed: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}

async fn handle_low_stock(stock_item_id: i64, available: i64, threshold: i64) -> Result<(), String> {
    warn!(
        "Low stock: stock_item_id={}, available={}, threshold={}",
        stock_item_id, available, threshold
    );
    // Reordering automation would hang off this handler.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        sender
            .send(Event::StockReceived {
                stock_item_id: 7,
                quantity: 5,
                available: 12,
            })
            .await
            .unwrap();

        match rx.recv().await {
            Some(Event::StockReceived {
                stock_item_id,
                quantity,
                available,
            }) => {
                assert_eq!(stock_item_id, 7);
                assert_eq!(quantity, 5);
                assert_eq!(available, 12);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_fails_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        let result = sender
            .send(Event::ItemAddedToCart {
                user_id: 1,
                stock_item_id: 2,
                quantity: 3,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn send_or_log_swallows_channel_failure() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or return an error.
        sender
            .send_or_log(Event::ItemRemovedFromCart {
                user_id: 1,
                stock_item_id: 2,
                quantity: 1,
            })
            .await;
    }
}
