// Domain types shared by the store, ingestion and scoring passes.

use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout used for every TEXT timestamp column. Fixed-width UTC so
/// lexicographic comparison in SQL matches chronological order.
pub const DB_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a UTC timestamp for storage.
pub fn to_db_time(t: DateTime<Utc>) -> String {
    t.format(DB_TIME_FORMAT).to_string()
}

/// Parse a timestamp previously written by [`to_db_time`].
pub fn from_db_time(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, DB_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .with_context(|| format!("invalid stored timestamp {s:?}"))
}

// ---------------------------------------------------------------------------
// Match status
// ---------------------------------------------------------------------------

/// Internal match lifecycle. Every external status code collapses into one
/// of these three states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Finished,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Live => "live",
            MatchStatus::Finished => "finished",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(MatchStatus::Scheduled),
            "live" => Some(MatchStatus::Live),
            "finished" => Some(MatchStatus::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Home or away side of a fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
        }
    }
}

// ---------------------------------------------------------------------------
// Elimination
// ---------------------------------------------------------------------------

/// Why a team was knocked out of the tournament.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EliminationReason {
    GroupStage,
    Knockout,
}

impl EliminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EliminationReason::GroupStage => "group_stage",
            EliminationReason::Knockout => "knockout",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "group_stage" => Some(EliminationReason::GroupStage),
            "knockout" => Some(EliminationReason::Knockout),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub external_id: Option<i64>,
    pub eliminated: bool,
    pub elimination_reason: Option<EliminationReason>,
    pub eliminated_at: Option<String>,
}

/// A match row as persisted by ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub id: i64,
    pub external_id: i64,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
    pub winner_team_id: Option<i64>,
    pub kickoff: DateTime<Utc>,
    pub status: MatchStatus,
    pub is_knockout: bool,
    pub created_at: String,
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// Query views served to the frontend
// ---------------------------------------------------------------------------

/// A match joined with team names and owners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchView {
    pub id: i64,
    pub external_id: i64,
    pub kickoff: String,
    pub home: String,
    pub away: String,
    pub home_owner: Option<String>,
    pub away_owner: Option<String>,
    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
    pub winner: Option<String>,
    pub winner_owner: Option<String>,
    pub status: MatchStatus,
    pub is_knockout: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub player: String,
    pub points: u32,
    pub matches_played: u32,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub last_updated: Option<String>,
}

/// One team in a player's roster, with its tournament status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnedTeam {
    pub name: String,
    pub eliminated: bool,
    pub elimination_reason: Option<EliminationReason>,
    pub eliminated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerRoster {
    pub name: String,
    pub teams: Vec<OwnedTeam>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn db_time_round_trips_and_sorts() {
        let early = Utc.with_ymd_and_hms(2025, 6, 14, 22, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 7, 13, 19, 0, 0).unwrap();

        assert_eq!(to_db_time(early), "2025-06-14T22:00:00Z");
        assert_eq!(from_db_time(&to_db_time(late)).unwrap(), late);
        assert!(to_db_time(early) < to_db_time(late));
    }

    #[test]
    fn from_db_time_rejects_garbage() {
        assert!(from_db_time("yesterday").is_err());
    }

    #[test]
    fn status_strings_match_schema_values() {
        for status in [MatchStatus::Scheduled, MatchStatus::Live, MatchStatus::Finished] {
            assert_eq!(MatchStatus::from_db(status.as_str()), Some(status));
        }
        assert_eq!(MatchStatus::from_db("FT"), None);
    }

    #[test]
    fn elimination_reason_strings() {
        assert_eq!(EliminationReason::GroupStage.as_str(), "group_stage");
        assert_eq!(
            EliminationReason::from_db("knockout"),
            Some(EliminationReason::Knockout)
        );
        assert_eq!(EliminationReason::from_db(""), None);
    }
}
