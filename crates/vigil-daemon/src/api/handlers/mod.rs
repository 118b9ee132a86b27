//! API request handlers

mod health;
mod metrics;
mod ws;

pub use health::*;
pub use metrics::*;
pub use ws::*;
