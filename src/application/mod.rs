//! Application layer: the transaction controller.
//!
//! `TransactionController` owns the lifecycle of a payment at the acceptor.
//! It drives the hardware and invoice ports from `domain::ports` and runs
//! discovery and settlement as two cooperating loops on the tokio runtime.

pub mod controller;
