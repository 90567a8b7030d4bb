// Leaderboard recomputation from finished matches and team ownership.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::info;

use crate::db::{self, settings, Database};
use crate::model::{to_db_time, LeaderboardEntry, Side};

pub const WIN_POINTS: u32 = 3;
pub const DRAW_POINTS: u32 = 1;
pub const KNOCKOUT_WIN_POINTS: u32 = 2;
pub const KNOCKOUT_LOSS_POINTS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Draw,
    Loss,
}

/// Points and result for one side of a finished match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideScore {
    pub points: u32,
    pub outcome: Outcome,
}

/// Score `side` of a finished match.
///
/// A knockout match with a recorded winner pays 2 to the winner and 1 to the
/// loser whatever the goals say. Everything else is scored on goals
/// (3 / 1 / 0). Returns `None` when there is nothing to score, e.g. a
/// cancelled match with no goals.
pub fn score_side(
    side: Side,
    home_goals: Option<u32>,
    away_goals: Option<u32>,
    winner: Option<Side>,
    knockout: bool,
) -> Option<SideScore> {
    if knockout {
        if let Some(winner) = winner {
            return Some(if winner == side {
                SideScore {
                    points: KNOCKOUT_WIN_POINTS,
                    outcome: Outcome::Win,
                }
            } else {
                SideScore {
                    points: KNOCKOUT_LOSS_POINTS,
                    outcome: Outcome::Loss,
                }
            });
        }
    }

    let (own, other) = match side {
        Side::Home => (home_goals?, away_goals?),
        Side::Away => (away_goals?, home_goals?),
    };
    Some(if own > other {
        SideScore {
            points: WIN_POINTS,
            outcome: Outcome::Win,
        }
    } else if own == other {
        SideScore {
            points: DRAW_POINTS,
            outcome: Outcome::Draw,
        }
    } else {
        SideScore {
            points: 0,
            outcome: Outcome::Loss,
        }
    })
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    points: u32,
    played: u32,
    wins: u32,
    draws: u32,
    losses: u32,
}

impl Tally {
    fn add(&mut self, score: SideScore) {
        self.points += score.points;
        self.played += 1;
        match score.outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Draw => self.draws += 1,
            Outcome::Loss => self.losses += 1,
        }
    }
}

/// Rebuild every leaderboard row from scratch and return the new standings.
pub fn recalculate(db: &Database) -> Result<Vec<LeaderboardEntry>> {
    recalculate_at(db, Utc::now())
}

/// Rebuild every leaderboard row in one transaction. Any failure rolls the
/// whole pass back and leaves the previous snapshot in place.
pub fn recalculate_at(db: &Database, now: DateTime<Utc>) -> Result<Vec<LeaderboardEntry>> {
    let mut conn = db.conn();
    let tx = conn
        .transaction()
        .context("failed to begin leaderboard transaction")?;
    let stamp = to_db_time(now);

    tx.execute(
        "INSERT OR IGNORE INTO leaderboard (player_id) SELECT id FROM players",
        [],
    )
    .context("failed to seed leaderboard rows")?;
    tx.execute(
        "UPDATE leaderboard
         SET points = 0, matches_played = 0, wins = 0, draws = 0, losses = 0, last_updated = ?1",
        params![stamp],
    )
    .context("failed to reset leaderboard")?;

    let tuples = {
        let mut stmt = tx
            .prepare(
                "SELECT pt.player_id, pt.team_id, m.home_team_id,
                        m.home_goals, m.away_goals, m.winner_team_id, m.is_knockout
                 FROM player_teams pt
                 JOIN matches m
                   ON m.home_team_id = pt.team_id OR m.away_team_id = pt.team_id
                 WHERE m.status = 'finished'
                 ORDER BY pt.player_id, m.id",
            )
            .context("failed to prepare scoring query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<u32>>(3)?,
                    row.get::<_, Option<u32>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, bool>(6)?,
                ))
            })
            .context("failed to query owned finished matches")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map scoring rows")?;
        rows
    };

    let mut tallies: HashMap<i64, Tally> = HashMap::new();
    let mut scored = 0usize;
    for (player_id, team_id, home_team_id, home_goals, away_goals, winner_team_id, knockout) in
        tuples
    {
        let side = if team_id == home_team_id {
            Side::Home
        } else {
            Side::Away
        };
        let winner = winner_team_id.map(|w| {
            if w == home_team_id {
                Side::Home
            } else {
                Side::Away
            }
        });
        if let Some(score) = score_side(side, home_goals, away_goals, winner, knockout) {
            tallies.entry(player_id).or_default().add(score);
            scored += 1;
        }
    }

    for (player_id, tally) in &tallies {
        tx.execute(
            "UPDATE leaderboard
             SET points = ?2, matches_played = ?3, wins = ?4, draws = ?5, losses = ?6
             WHERE player_id = ?1",
            params![
                player_id,
                tally.points,
                tally.played,
                tally.wins,
                tally.draws,
                tally.losses
            ],
        )
        .context("failed to write leaderboard row")?;
    }

    tx.execute(
        "DELETE FROM system_settings WHERE key = ?1",
        params![settings::LEADERBOARD_DIRTY],
    )
    .context("failed to clear leaderboard dirty marker")?;

    tx.commit().context("failed to commit leaderboard")?;

    let entries = db::read_leaderboard(&conn)?;
    info!(
        players = entries.len(),
        scored_results = scored,
        "leaderboard recalculated"
    );
    Ok(entries)
}
