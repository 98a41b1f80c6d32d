pub mod delivery_repo;
pub mod history_repo;
pub mod subscription_repo;
pub mod transaction_repo;

pub use delivery_repo::{DeliveryRepository, PgDeliveryRepository};
pub use history_repo::{HistoryRepository, PgHistoryRepository};
pub use subscription_repo::{PgSubscriptionRepository, SubscriptionRepository};
pub use transaction_repo::{PgTransactionRepository, TransactionRepository};
