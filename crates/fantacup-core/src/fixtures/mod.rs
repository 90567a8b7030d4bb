// Fixture records and the source seam the update jobs fetch through.

pub mod client;
pub mod status;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

pub use status::FixtureStatus;

use crate::model::Side;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A team as referenced by a fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamRef {
    /// The source's own team identifier, when it sends one.
    pub external_id: Option<i64>,
    pub name: String,
}

impl TeamRef {
    pub fn named(name: &str) -> Self {
        Self {
            external_id: None,
            name: name.to_string(),
        }
    }
}

/// A home/away goal pair from one phase of the score breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreLine {
    pub home: u32,
    pub away: u32,
}

/// One fixture as delivered by the source, already decoded from the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureRecord {
    pub external_id: i64,
    pub kickoff: DateTime<Utc>,
    pub status: FixtureStatus,
    pub home: TeamRef,
    pub away: TeamRef,
    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
    /// Winner as flagged by the source, if it flagged one.
    pub winner: Option<Side>,
    /// Shoot-out score, present only when penalties were taken.
    pub penalties: Option<ScoreLine>,
    /// Goals scored during extra time, present only when it was played.
    pub extra_time: Option<ScoreLine>,
}

// ---------------------------------------------------------------------------
// Source seam
// ---------------------------------------------------------------------------

/// Which slice of the tournament to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchWindow {
    /// Every fixture of the configured league and season.
    FullTournament,
    /// Fixtures whose kickoff date falls within `from..=to`.
    Dates { from: NaiveDate, to: NaiveDate },
}

impl FetchWindow {
    /// `today - days ..= today + days`.
    pub fn around(today: NaiveDate, days: i64) -> Self {
        let span = chrono::Duration::days(days.max(0));
        FetchWindow::Dates {
            from: today - span,
            to: today + span,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("rate limit exceeded")]
    RateLimited,

    #[error("authentication failed")]
    Unauthorized,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("fixtures API reported errors: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Short tag used in log fields.
    pub fn category(&self) -> &'static str {
        match self {
            SourceError::RateLimited => "rate_limited",
            SourceError::Unauthorized => "unauthorized",
            SourceError::Timeout(_) => "timeout",
            SourceError::Status(_) => "http_status",
            SourceError::Api(_) => "api_error",
            SourceError::Transport(_) => "transport",
            SourceError::Malformed(_) => "malformed",
        }
    }
}

/// Anything that can deliver fixtures. The live implementation is
/// [`client::ApiFootballClient`]; tests script their own.
#[async_trait]
pub trait FixtureSource: Send + Sync {
    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<FixtureRecord>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_around_today_spans_both_directions() {
        let today = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        assert_eq!(
            FetchWindow::around(today, 1),
            FetchWindow::Dates {
                from: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
                to: NaiveDate::from_ymd_opt(2025, 7, 2).unwrap(),
            }
        );
    }

    #[test]
    fn negative_window_collapses_to_today() {
        let today = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        assert_eq!(
            FetchWindow::around(today, -3),
            FetchWindow::Dates { from: today, to: today }
        );
    }

    #[test]
    fn error_categories() {
        assert_eq!(SourceError::RateLimited.category(), "rate_limited");
        assert_eq!(
            SourceError::Timeout(Duration::from_secs(15)).category(),
            "timeout"
        );
        assert_eq!(SourceError::Status(503).to_string(), "unexpected HTTP status 503");
    }
}
