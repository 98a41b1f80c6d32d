pub mod delivery;
pub mod event;
pub mod history;
pub mod subscription;
pub mod transaction;

pub use delivery::{DeliveryStatus, WebhookDelivery};
pub use event::{EventMessage, EventType, WebhookEventMessage};
pub use history::{NewHistoryEntry, TransactionHistoryEntry};
pub use subscription::{NewSubscription, WebhookSubscription};
pub use transaction::{Transaction, TransactionRequest, TransactionStatus};
