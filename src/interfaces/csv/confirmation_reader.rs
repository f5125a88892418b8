use crate::domain::ledger::{Target, TargetType};
use crate::error::{Result, UnlockError};
use serde::Deserialize;
use std::io::Read;

/// One "this payment went through" notification, as delivered by a redirect
/// or a webhook. The same payment may appear any number of times.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Confirmation {
    pub subject: String,
    pub target: String,
    pub target_type: TargetType,
    pub payment_reference: String,
}

impl Confirmation {
    pub fn target(&self) -> Target {
        Target::new(self.target.clone(), self.target_type)
    }
}

/// Reads confirmations from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<Confirmation>`.
/// It handles whitespace trimming and flexible record lengths automatically.
pub struct ConfirmationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ConfirmationReader<R> {
    /// Creates a new `ConfirmationReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes confirmations.
    ///
    /// A malformed row yields an error for that row only; reading continues
    /// with the next one.
    pub fn confirmations(self) -> impl Iterator<Item = Result<Confirmation>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(UnlockError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_valid_stream() {
        let data = "subject, target, target_type, payment_reference\n\
                    S1, 42, investor:platform, pay_abc\n\
                    S2, 42, investor:external-directory, pay_def";
        let reader = ConfirmationReader::new(data.as_bytes());
        let results: Vec<Result<Confirmation>> = reader.confirmations().collect();

        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.subject, "S1");
        assert_eq!(first.target(), Target::platform_investor("42"));
        let second = results[1].as_ref().unwrap();
        assert_eq!(second.target(), Target::directory_investor("42"));
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "subject, target, target_type, payment_reference\n\
                    S1, 42, investor:unknown, pay_abc\n\
                    S1, p1, project-visibility, pay_def";
        let reader = ConfirmationReader::new(data.as_bytes());
        let results: Vec<Result<Confirmation>> = reader.confirmations().collect();

        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().target(), Target::project("p1"));
    }
}
