//! Transaction coordination.
//!
//! A coordinated transaction reconciles two completion signals: the unit of
//! work's own result and the native transaction's terminal event. The
//! result is only released after the engine has committed.
//!
//! - **Atomicity**: every write of the unit of work commits, or none does
//! - **Error precedence**: a failing unit of work surfaces its own error
//! - **Scope**: one native transaction per call, never reused

mod coordinator;
mod state;

pub use coordinator::{TransactionCoordinator, TransactionOf};
pub use state::{TransactionScope, TransactionState};
