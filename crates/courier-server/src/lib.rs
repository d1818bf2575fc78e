//! # courier-server
//!
//! Axum HTTP surface over a running connection manager: outbound sends,
//! connection status, the pairing QR page, and a health endpoint.

#![deny(unsafe_code)]

pub mod error;
pub mod facade;
pub mod handlers;
pub mod qr;
pub mod server;

pub use error::ApiError;
pub use facade::{GatewayFacade, GatewayStatus, HealthReport, QrView};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
