//! Command Handlers module
//!
//! Handlers validate a command, mutate the balance aggregate, and commit the
//! balance, the entry and the outbox rows as one unit of work. Optimistic
//! concurrency conflicts are retried a bounded number of times.

mod adjustment_handler;
mod commands;
mod post_handler;
mod reservation_handler;
mod retry;
mod void_handler;


pub use adjustment_handler::AdjustmentHandler;
pub use commands::*;
pub use post_handler::PostTransactionHandler;
pub use reservation_handler::ReservationHandler;
pub use retry::RetryPolicy;
pub use void_handler::VoidTransactionHandler;
