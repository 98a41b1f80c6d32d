pub mod reconciliation;
pub mod state_machine;

pub use reconciliation::reconcile;
pub use state_machine::{StateMachineError, TransactionStateMachine};
