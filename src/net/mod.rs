//! Network layer: a resilient HTTP client and its error taxonomy.

mod client;
mod error;

pub use client::{ApiResponse, ResilientClient};
pub use error::{ApiError, ErrorKind};
