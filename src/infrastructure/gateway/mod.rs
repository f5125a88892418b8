//! Payment provider adapters.

pub mod http;
pub mod sandbox;

pub use http::{GatewayConfig, HttpPaymentProvider};
pub use sandbox::SandboxGateway;
