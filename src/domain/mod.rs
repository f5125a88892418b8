//! Domain layer: ledger value types, payment types and the ports the
//! application layer depends on.

pub mod demand;
pub mod ledger;
pub mod onboarding;
pub mod payment;
pub mod ports;
