pub mod alert_dispatcher;
pub mod subscription_registry;
pub mod transaction_service;
pub mod webhook_delivery;
