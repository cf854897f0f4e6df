//! Adapters for the domain ports: GPIO drivers and invoice backends.

pub mod http;
pub mod in_memory;
pub mod simulated;
pub mod sysfs;
