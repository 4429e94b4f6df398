//! Data Transfer Objects
//!
//! Request and response structures for the API.

pub mod contract;
pub mod fees;
pub mod payment;

pub use contract::*;
pub use fees::*;
pub use payment::*;
