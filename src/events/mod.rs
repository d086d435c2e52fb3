//! Activity trail for procurement transitions.
//!
//! Services publish [`Event`]s through an [`EventSender`]; a background task
//! drains the channel into the slog activity logger. Publishing never blocks and
//! never fails the operation that produced the event.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use slog::Logger;
use tokio::sync::mpsc;
use tracing::{info, warn};
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

    /// Creates a bounded channel and the sender half wrapping it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Fire-and-forget publish. A full or closed channel drops the event with a warning.
    pub fn publish(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            let name = match &e {
                mpsc::error::TrySendError::Full(event)
                | mpsc::error::TrySendError::Closed(event) => event.name(),
            };
            warn!(event = name, error = %e, "Dropped activity event");
        }
    }
}

/// One record of the procurement activity trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    PurchaseOrderCreated {
        order_id: Uuid,
        correlation_id: Uuid,
        supervisor_id: Uuid,
        vendor_id: Option<Uuid>,
        asset_name: String,
        quantity: i32,
    },
    QuoteSubmitted {
        order_id: Uuid,
        correlation_id: Uuid,
        vendor_id: Uuid,
        quote: Decimal,
    },
    PurchaseOrderApproved {
        order_id: Uuid,
        correlation_id: Uuid,
        admin_id: Uuid,
    },
    SiblingQuotesRejected {
        correlation_id: Uuid,
        winner_id: Uuid,
        rejected: u64,
    },
    PurchaseOrderRejected {
        order_id: Uuid,
        admin_id: Uuid,
    },
    PurchaseOrderSupplied {
        order_id: Uuid,
        vendor_id: Uuid,
        supplied: i32,
        remaining: i32,
        first_serial: String,
        last_serial: String,
    },
    PurchaseOrderDelivered {
        order_id: Uuid,
        vendor_id: Uuid,
        delivered_at: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::PurchaseOrderCreated { .. } => "purchase_order_created",
            Event::QuoteSubmitted { .. } => "quote_submitted",
            Event::PurchaseOrderApproved { .. } => "purchase_order_approved",
            Event::SiblingQuotesRejected { .. } => "sibling_quotes_rejected",
            Event::PurchaseOrderRejected { .. } => "purchase_order_rejected",
            Event::PurchaseOrderSupplied { .. } => "purchase_order_supplied",
            Event::PurchaseOrderDelivered { .. } => "purchase_order_delivered",
        }
    }
}

/// Drains the activity channel into the activity logger until every sender is dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>, logger: Logger) {
    info!("Starting activity event processing loop");

    while let Some(event) = receiver.recv().await {
        let logger = logger.new(slog::o!("event" => event.name()));
        match event {
            Event::PurchaseOrderCreated {
                order_id,
                correlation_id,
                supervisor_id,
                vendor_id,
                asset_name,
                quantity,
            } => {
                slog::info!(logger, "Purchase order requested";
                    "order_id" => %order_id,
                    "correlation_id" => %correlation_id,
                    "supervisor_id" => %supervisor_id,
                    "vendor_id" => vendor_id.map(|v| v.to_string()).unwrap_or_else(|| "broadcast".to_string()),
                    "asset_name" => asset_name,
                    "quantity" => quantity,
                );
            }
            Event::QuoteSubmitted {
                order_id,
                correlation_id,
                vendor_id,
                quote,
            } => {
                slog::info!(logger, "Quote submitted";
                    "order_id" => %order_id,
                    "correlation_id" => %correlation_id,
                    "vendor_id" => %vendor_id,
                    "quote" => %quote,
                );
            }
            Event::PurchaseOrderApproved {
                order_id,
                correlation_id,
                admin_id,
            } => {
                slog::info!(logger, "Purchase order approved";
                    "order_id" => %order_id,
                    "correlation_id" => %correlation_id,
                    "admin_id" => %admin_id,
                );
            }
            Event::SiblingQuotesRejected {
                correlation_id,
                winner_id,
                rejected,
            } => {
                slog::info!(logger, "Competing quotes rejected";
                    "correlation_id" => %correlation_id,
                    "winner_id" => %winner_id,
                    "rejected" => rejected,
                );
            }
            Event::PurchaseOrderRejected { order_id, admin_id } => {
                slog::info!(logger, "Purchase order rejected";
                    "order_id" => %order_id,
                    "admin_id" => %admin_id,
                );
            }
            Event::PurchaseOrderSupplied {
                order_id,
                vendor_id,
                supplied,
                remaining,
                first_serial,
                last_serial,
            } => {
                slog::info!(logger, "Assets supplied";
                    "order_id" => %order_id,
                    "vendor_id" => %vendor_id,
                    "supplied" => supplied,
                    "remaining" => remaining,
                    "first_serial" => first_serial,
                    "last_serial" => last_serial,
                );
            }
            Event::PurchaseOrderDelivered {
                order_id,
                vendor_id,
                delivered_at,
            } => {
                slog::info!(logger, "Purchase order delivered";
                    "order_id" => %order_id,
                    "vendor_id" => %vendor_id,
                    "delivered_at" => %delivered_at,
                );
            }
        }
    }

    warn!("Activity event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::discard_logger;

    fn rejected(order_id: Uuid) -> Event {
        Event::PurchaseOrderRejected {
            order_id,
            admin_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn publish_delivers_to_the_receiver() {
        let (sender, mut rx) = EventSender::channel(4);
        let id = Uuid::new_v4();
        sender.publish(rejected(id));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "purchase_order_rejected");
        assert_matches::assert_matches!(
            event,
            Event::PurchaseOrderRejected { order_id, .. } if order_id == id
        );
    }

    #[tokio::test]
    async fn publish_on_a_full_or_closed_channel_does_not_panic() {
        let (sender, rx) = EventSender::channel(1);
        sender.publish(rejected(Uuid::new_v4()));
        sender.publish(rejected(Uuid::new_v4()));
        drop(rx);
        sender.publish(rejected(Uuid::new_v4()));
        assert!(sender.sender.is_closed());
    }

    #[tokio::test]
    async fn processing_stops_when_senders_are_dropped() {
        let (sender, rx) = EventSender::channel(8);
        sender.publish(Event::SiblingQuotesRejected {
            correlation_id: Uuid::new_v4(),
            winner_id: Uuid::new_v4(),
            rejected: 2,
        });
        drop(sender);

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            process_events(rx, discard_logger()),
        )
        .await
        .expect("event loop should finish once the channel closes");
    }
}
