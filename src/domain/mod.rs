//! Domain layer: money, pulses, deadlines and the payment service model.
//!
//! Nothing in here performs I/O; hardware and network access go through the
//! traits in [`ports`].

pub mod amount;
pub mod denomination;
pub mod invoice;
pub mod ports;
pub mod pulse;
pub mod settlement;
pub mod transaction;
