//! Streaming CSV input of payment confirmations and CSV reports.

pub mod confirmation_reader;
pub mod report_writer;
