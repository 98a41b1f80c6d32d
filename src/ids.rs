//! Clock and identifier generation, kept behind a thin module so tests
//! can reason about time explicitly where needed.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Random identifier for entities with no natural caller-supplied id
/// (deliveries generated internally, outbox rows, etc).
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

/// Time-ordered identifier, used where insertion order should roughly
/// track id order (helpful for index locality on high-volume tables).
pub fn new_ordered_id() -> Uuid {
    Uuid::now_v7()
}

/// A short hex nonce for the webhook timestamp header
/// (`t=<millis>,n=<nonce>`).
pub fn nonce() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes)
}
