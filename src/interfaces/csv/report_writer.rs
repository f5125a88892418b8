use crate::domain::demand::{LeaderboardRow, TargetStats};
use crate::domain::ledger::{LedgerEntry, Target};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// Decimal places shown for average scores.
const SCORE_DP: u32 = 2;

#[derive(Serialize)]
struct EntryRecord<'a> {
    id: u64,
    kind: &'static str,
    subject: &'a str,
    target: &'a str,
    target_type: &'static str,
    payment_reference: &'a str,
    amount: u64,
    created_at: String,
    tag: Option<&'a str>,
}

#[derive(Serialize)]
struct LeaderboardRecord<'a> {
    position: u32,
    target: &'a str,
    target_type: &'static str,
    requests: usize,
    avg_score: String,
}

#[derive(Serialize)]
struct StatsRecord<'a> {
    target: &'a str,
    target_type: &'static str,
    total_requests: usize,
    top_tag: Option<&'a str>,
    avg_score: Option<String>,
}

/// Writes ledger entries, leaderboards and stats as CSV.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        self.writer.serialize(EntryRecord {
            id: entry.id.0,
            kind: if entry.is_unlock() { "unlock" } else { "refund" },
            subject: &entry.subject_id,
            target: &entry.target.id,
            target_type: entry.target.kind.as_str(),
            payment_reference: &entry.payment_reference,
            amount: entry.amount.minor_units(),
            created_at: entry.created_at.to_rfc3339(),
            tag: entry.tag(),
        })?;
        Ok(())
    }

    pub fn write_leaderboard(&mut self, rows: &[LeaderboardRow]) -> Result<()> {
        for row in rows {
            self.writer.serialize(LeaderboardRecord {
                position: row.position,
                target: &row.target_id,
                target_type: row.target_type.as_str(),
                requests: row.request_count,
                avg_score: row.avg_score.round_dp(SCORE_DP).normalize().to_string(),
            })?;
        }
        Ok(())
    }

    pub fn write_stats(&mut self, target: &Target, stats: &TargetStats) -> Result<()> {
        self.writer.serialize(StatsRecord {
            target: &target.id,
            target_type: target.kind.as_str(),
            total_requests: stats.total_requests,
            top_tag: stats.top_tag.as_deref(),
            avg_score: stats
                .avg_score
                .map(|s| s.round_dp(SCORE_DP).normalize().to_string()),
        })?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::TargetType;
    use rust_decimal_macros::dec;

    fn render(write: impl FnOnce(&mut ReportWriter<&mut Vec<u8>>)) -> String {
        let mut buf = Vec::new();
        {
            let mut writer = ReportWriter::new(&mut buf);
            write(&mut writer);
            writer.flush().unwrap();
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_leaderboard_csv() {
        let rows = vec![LeaderboardRow {
            position: 1,
            target_id: "7".to_string(),
            target_type: TargetType::DirectoryInvestor,
            request_count: 3,
            avg_score: dec!(200) / dec!(3),
        }];
        let out = render(|w| w.write_leaderboard(&rows).unwrap());
        assert_eq!(
            out,
            "position,target,target_type,requests,avg_score\n1,7,investor:external-directory,3,66.67\n"
        );
    }

    #[test]
    fn test_stats_csv_for_unrequested_target() {
        let stats = TargetStats {
            total_requests: 0,
            top_tag: None,
            avg_score: None,
        };
        let out = render(|w| w.write_stats(&Target::platform_investor("9"), &stats).unwrap());
        assert_eq!(
            out,
            "target,target_type,total_requests,top_tag,avg_score\n9,investor:platform,0,,\n"
        );
    }
}
