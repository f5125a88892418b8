//! Application layer containing the unlock subsystem's orchestration.
//!
//! `UnlockEngine` is the single writer of the ledger; `AccessQueryService` and
//! `RankingEngine` only read it. `Marketplace` composes them behind one API.

pub mod access;
pub mod gateway;
pub mod marketplace;
pub mod ranking;
pub mod unlock;
