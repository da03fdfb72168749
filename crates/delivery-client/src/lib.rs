//! FastOTP delivery API client.

mod client;
mod error;
mod types;

pub use client::DeliveryClient;
pub use error::DeliveryError;
pub use types::*;
