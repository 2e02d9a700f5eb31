//! Gateway: HTTP surface of the dispatch service.
//!
//! Single port serves the health probe and the inbound workflow callback.

mod server;

pub use server::{router, run_gateway, GatewayState, CALLBACK_SECRET_HEADER};
