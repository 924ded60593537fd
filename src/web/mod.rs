//! HTTP surface for the holiday cache.

pub mod encoding;
pub mod holidays;
pub mod middleware;
pub mod routes;
pub mod status;

pub use routes::*;
