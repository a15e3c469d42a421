//! Data models for Emporia entities

mod customer;
mod device;
mod usage;
mod vehicle;

pub use customer::*;
pub use device::*;
pub use usage::*;
pub use vehicle::*;
