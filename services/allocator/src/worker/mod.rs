//! Background workers.
//!
//! - [`IntakeWorker`] drains the intake queue and runs dispatch for each
//!   claimed request.
//! - [`JanitorWorker`] reclaims allocation records past their expiration.

mod intake;
mod janitor;

pub use intake::IntakeWorker;
pub use janitor::JanitorWorker;
