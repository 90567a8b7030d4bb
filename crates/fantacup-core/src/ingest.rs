// Match ingestion: one fixture record in, one upserted match row out.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::{debug, warn};

use crate::db::{self, settings, Database};
use crate::fixtures::FixtureRecord;
use crate::model::{to_db_time, MatchStatus, Side};

/// What happened to the match row for one ingested record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub match_id: i64,
    pub external_id: i64,
    /// The row did not exist before this record.
    pub created: bool,
    /// Stored status before this record; `None` when newly created.
    pub previous_status: Option<MatchStatus>,
    pub status: MatchStatus,
    /// Goals, winner, status, knockout flag, kickoff or teams differ from the
    /// previously stored values (always true for a created row).
    pub changed: bool,
    /// Names of teams this record caused to be created.
    pub created_teams: Vec<String>,
}

impl IngestOutcome {
    /// The match reached `finished` with this record.
    pub fn newly_finished(&self) -> bool {
        self.status == MatchStatus::Finished && self.previous_status != Some(MatchStatus::Finished)
    }

    /// A finished match whose stored result is new or different, i.e. one
    /// that moves the standings.
    pub fn affects_standings(&self) -> bool {
        self.status == MatchStatus::Finished && (self.changed || self.newly_finished())
    }
}

/// The side that won, if any. An explicit winner flag from the source wins;
/// otherwise a finished match goes to the side with more goals, and a level
/// match to the side that won the shoot-out. Draws and unfinished matches
/// have no winner.
pub fn derive_winner(record: &FixtureRecord) -> Option<Side> {
    if record.winner.is_some() {
        return record.winner;
    }
    if record.status.match_status() != MatchStatus::Finished {
        return None;
    }
    let by_goals = match (record.home_goals, record.away_goals) {
        (Some(h), Some(a)) => higher(h, a),
        _ => None,
    };
    by_goals.or_else(|| record.penalties.and_then(|p| higher(p.home, p.away)))
}

fn higher(home: u32, away: u32) -> Option<Side> {
    match home.cmp(&away) {
        std::cmp::Ordering::Greater => Some(Side::Home),
        std::cmp::Ordering::Less => Some(Side::Away),
        std::cmp::Ordering::Equal => None,
    }
}

/// A finished match that was settled by extra time or a shoot-out.
pub fn is_knockout(record: &FixtureRecord) -> bool {
    record.status.match_status() == MatchStatus::Finished
        && (record.status.decided_after_regulation() || record.penalties.is_some())
}

/// Upsert one fixture by its external id inside its own transaction.
pub fn ingest_fixture(db: &Database, record: &FixtureRecord) -> Result<IngestOutcome> {
    ingest_fixture_at(db, record, Utc::now())
}

pub fn ingest_fixture_at(
    db: &Database,
    record: &FixtureRecord,
    now: DateTime<Utc>,
) -> Result<IngestOutcome> {
    if record.status.is_unknown() {
        warn!(
            fixture = record.external_id,
            code = record.status.code(),
            "unknown fixture status code, storing as scheduled"
        );
    }

    let mut conn = db.conn();
    let tx = conn
        .transaction()
        .context("failed to begin ingest transaction")?;

    let mut created_teams = Vec::new();
    let (home_id, home_created) = db::resolve_team(&tx, &record.home)?;
    if home_created {
        created_teams.push(record.home.name.trim().to_string());
    }
    let (away_id, away_created) = db::resolve_team(&tx, &record.away)?;
    if away_created {
        created_teams.push(record.away.name.trim().to_string());
    }

    if !db::is_owned(&tx, home_id)? && !db::is_owned(&tx, away_id)? {
        warn!(
            fixture = record.external_id,
            home = %record.home.name,
            away = %record.away.name,
            "neither team has an owner"
        );
    }

    let status = record.status.match_status();
    let winner_team_id = derive_winner(record).map(|side| match side {
        Side::Home => home_id,
        Side::Away => away_id,
    });
    let knockout = is_knockout(record);
    let kickoff = record.kickoff;

    let previous = db::load_match(&tx, record.external_id)?;

    let changed = match &previous {
        None => true,
        Some(p) => {
            p.home_team_id != home_id
                || p.away_team_id != away_id
                || p.home_goals != record.home_goals
                || p.away_goals != record.away_goals
                || p.winner_team_id != winner_team_id
                || p.status != status
                || p.is_knockout != knockout
                || p.kickoff != kickoff
        }
    };

    let stamp = to_db_time(now);
    let match_id: i64 = tx
        .query_row(
            "INSERT INTO matches
                (external_id, home_team_id, away_team_id, home_goals, away_goals,
                 winner_team_id, kickoff, status, is_knockout, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(external_id) DO UPDATE SET
                home_team_id   = excluded.home_team_id,
                away_team_id   = excluded.away_team_id,
                home_goals     = excluded.home_goals,
                away_goals     = excluded.away_goals,
                winner_team_id = excluded.winner_team_id,
                kickoff        = excluded.kickoff,
                status         = excluded.status,
                is_knockout    = excluded.is_knockout,
                updated_at     = CASE WHEN ?11 THEN excluded.updated_at ELSE matches.updated_at END
             RETURNING id",
            params![
                record.external_id,
                home_id,
                away_id,
                record.home_goals,
                record.away_goals,
                winner_team_id,
                to_db_time(kickoff),
                status.as_str(),
                knockout,
                stamp,
                changed,
            ],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to upsert match {}", record.external_id))?;

    let outcome = IngestOutcome {
        match_id,
        external_id: record.external_id,
        created: previous.is_none(),
        previous_status: previous.map(|p| p.status),
        status,
        changed,
        created_teams,
    };
    if outcome.affects_standings() {
        db::write_setting(&tx, settings::LEADERBOARD_DIRTY, &stamp, now)?;
    }
    tx.commit().context("failed to commit ingest")?;

    debug!(
        fixture = record.external_id,
        created = outcome.created,
        changed = outcome.changed,
        status = %outcome.status,
        "ingested fixture"
    );
    Ok(outcome)
}
