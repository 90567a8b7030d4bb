// Team elimination: the one-shot group-stage cut and automatic knockout losses.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{self, settings, Database};
use crate::model::{to_db_time, EliminationReason, Side};

/// Result of a group-stage elimination request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GroupStageOutcome {
    /// The cut already ran; nothing was touched.
    AlreadyCompleted { completed_at: String },
    Completed(GroupStageReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupStageReport {
    pub eliminated: Vec<String>,
    pub already_eliminated: Vec<String>,
    pub not_found: Vec<String>,
}

/// Eliminate the named teams at the end of the group stage.
///
/// Runs at most once: the completion marker is written in the same
/// transaction as the team updates, and a second call returns
/// [`GroupStageOutcome::AlreadyCompleted`]. Names are matched exactly or
/// through the alias table.
pub fn eliminate_group_stage(
    db: &Database,
    team_names: &[String],
    now: DateTime<Utc>,
) -> Result<GroupStageOutcome> {
    let mut conn = db.conn();
    let tx = conn
        .transaction()
        .context("failed to begin group-stage transaction")?;

    if let Some(completed_at) =
        db::read_setting(&tx, settings::GROUP_STAGE_ELIMINATION_COMPLETED)?
    {
        info!(%completed_at, "group-stage elimination already completed");
        return Ok(GroupStageOutcome::AlreadyCompleted { completed_at });
    }

    let stamp = to_db_time(now);
    let mut report = GroupStageReport::default();

    for raw in team_names {
        let name = raw.trim();
        if name.is_empty() {
            continue;
        }
        match find_team(&tx, name)? {
            None => report.not_found.push(name.to_string()),
            Some((_, canonical, true)) => report.already_eliminated.push(canonical),
            Some((id, canonical, false)) => {
                eliminate(&tx, id, EliminationReason::GroupStage, &stamp)?;
                report.eliminated.push(canonical);
            }
        }
    }

    db::write_setting(&tx, settings::GROUP_STAGE_ELIMINATION_COMPLETED, &stamp, now)?;
    tx.commit()
        .context("failed to commit group-stage elimination")?;

    if !report.not_found.is_empty() {
        warn!(teams = ?report.not_found, "group-stage elimination: unknown teams");
    }
    info!(
        eliminated = report.eliminated.len(),
        already = report.already_eliminated.len(),
        not_found = report.not_found.len(),
        "group-stage elimination completed"
    );
    Ok(GroupStageOutcome::Completed(report))
}

/// The side that lost a finished match: the side with fewer goals, or when
/// goals are level (or missing) the side that is not the recorded winner.
/// `None` for a draw with no recorded winner.
pub fn losing_side(
    home_goals: Option<u32>,
    away_goals: Option<u32>,
    winner: Option<Side>,
) -> Option<Side> {
    match (home_goals, away_goals) {
        (Some(h), Some(a)) if h > a => Some(Side::Away),
        (Some(h), Some(a)) if a > h => Some(Side::Home),
        _ => winner.map(Side::opponent),
    }
}

/// Eliminate the losers of finished matches that kicked off at or after
/// `cutoff` and have not been processed yet. Returns the names of teams
/// newly eliminated. Does nothing before `cutoff`.
///
/// Each processed match is marked so later scans skip it. Draws with no
/// recorded winner stay unmarked and are looked at again next time.
pub fn process_knockout_eliminations(
    db: &Database,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    if now < cutoff {
        return Ok(Vec::new());
    }

    let mut conn = db.conn();
    let tx = conn
        .transaction()
        .context("failed to begin knockout elimination transaction")?;

    let pending = {
        let mut stmt = tx
            .prepare(
                "SELECT id, home_team_id, away_team_id, home_goals, away_goals, winner_team_id
                 FROM matches
                 WHERE status = 'finished'
                   AND kickoff >= ?1
                   AND elimination_processed_at IS NULL
                 ORDER BY kickoff, id",
            )
            .context("failed to prepare knockout scan")?;
        let rows = stmt
            .query_map(params![to_db_time(cutoff)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<u32>>(3)?,
                    row.get::<_, Option<u32>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            })
            .context("failed to scan knockout matches")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map knockout matches")?;
        rows
    };

    let stamp = to_db_time(now);
    let mut newly_eliminated = Vec::new();

    for (match_id, home_id, away_id, home_goals, away_goals, winner_id) in pending {
        let winner = winner_id.map(|w| if w == home_id { Side::Home } else { Side::Away });
        let Some(loser) = losing_side(home_goals, away_goals, winner) else {
            continue;
        };
        let loser_id = match loser {
            Side::Home => home_id,
            Side::Away => away_id,
        };

        if eliminate(&tx, loser_id, EliminationReason::Knockout, &stamp)? {
            let name: String = tx
                .query_row("SELECT name FROM teams WHERE id = ?1", params![loser_id], |row| {
                    row.get(0)
                })
                .context("failed to read eliminated team name")?;
            info!(team = %name, match_id, "team eliminated in knockout stage");
            newly_eliminated.push(name);
        }

        tx.execute(
            "UPDATE matches SET elimination_processed_at = ?1 WHERE id = ?2",
            params![stamp, match_id],
        )
        .context("failed to mark match processed")?;
    }

    tx.commit()
        .context("failed to commit knockout eliminations")?;
    Ok(newly_eliminated)
}

/// Clear every elimination, the group-stage marker and all processed
/// markers. Returns the number of teams that were un-eliminated.
pub fn reset_all_eliminations(db: &Database) -> Result<usize> {
    let mut conn = db.conn();
    let tx = conn
        .transaction()
        .context("failed to begin elimination reset")?;

    let cleared = tx
        .execute(
            "UPDATE teams SET eliminated = 0, elimination_reason = NULL, eliminated_at = NULL
             WHERE eliminated = 1",
            [],
        )
        .context("failed to clear eliminations")?;
    tx.execute(
        "DELETE FROM system_settings WHERE key = ?1",
        params![settings::GROUP_STAGE_ELIMINATION_COMPLETED],
    )
    .context("failed to clear group-stage marker")?;
    tx.execute(
        "UPDATE matches SET elimination_processed_at = NULL",
        [],
    )
    .context("failed to clear processed markers")?;

    tx.commit().context("failed to commit elimination reset")?;
    warn!(teams = cleared, "all eliminations reset");
    Ok(cleared)
}

/// `(id, canonical name, eliminated)` for a team name or alias.
fn find_team(conn: &Connection, name: &str) -> Result<Option<(i64, String, bool)>> {
    conn.query_row(
        "SELECT id, name, eliminated FROM teams WHERE name = ?1
         UNION ALL
         SELECT t.id, t.name, t.eliminated
         FROM team_aliases a JOIN teams t ON t.id = a.team_id
         WHERE a.alias = ?1
         LIMIT 1",
        params![name],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()
    .with_context(|| format!("failed to look up team {name}"))
}

/// Flag a team as eliminated unless it already is. Returns whether the row
/// changed.
fn eliminate(conn: &Connection, team_id: i64, reason: EliminationReason, stamp: &str) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE teams SET eliminated = 1, elimination_reason = ?2, eliminated_at = ?3
             WHERE id = ?1 AND eliminated = 0",
            params![team_id, reason.as_str(), stamp],
        )
        .context("failed to eliminate team")?;
    Ok(changed == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FixtureRecord, FixtureStatus, TeamRef};
    use crate::ingest::ingest_fixture;
    use chrono::TimeZone;

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn cutoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 28, 0, 0, 0).unwrap()
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
    }

    fn fixture(id: i64, kickoff: DateTime<Utc>, home: &str, away: &str, code: &str, goals: (u32, u32)) -> FixtureRecord {
        FixtureRecord {
            external_id: id,
            kickoff,
            status: FixtureStatus::from_code(code),
            home: TeamRef::named(home),
            away: TeamRef::named(away),
            home_goals: Some(goals.0),
            away_goals: Some(goals.1),
            winner: None,
            penalties: None,
            extra_time: None,
        }
    }

    fn is_eliminated(db: &Database, team: &str) -> bool {
        db.team_by_name(team).unwrap().unwrap().eliminated
    }

    // ------------------------------------------------------------------
    // losing_side
    // ------------------------------------------------------------------

    #[test]
    fn losing_side_prefers_goals_then_winner() {
        assert_eq!(losing_side(Some(2), Some(0), None), Some(Side::Away));
        assert_eq!(losing_side(Some(0), Some(1), None), Some(Side::Home));
        assert_eq!(losing_side(Some(1), Some(1), Some(Side::Away)), Some(Side::Home));
        assert_eq!(losing_side(None, None, Some(Side::Home)), Some(Side::Away));
        assert_eq!(losing_side(Some(1), Some(1), None), None);
    }

    // ------------------------------------------------------------------
    // Group stage
    // ------------------------------------------------------------------

    #[test]
    fn group_stage_runs_once() {
        let db = test_db();
        db.import_ownership(&[
            ("Anna".into(), "Chelsea".into()),
            ("Anna".into(), "Porto".into()),
            ("Bea".into(), "Ulsan".into()),
        ])
        .unwrap();

        let first =
            eliminate_group_stage(&db, &names(&["Porto", "Ulsan", "Atlantis"]), at(27, 12)).unwrap();
        match first {
            GroupStageOutcome::Completed(report) => {
                assert_eq!(report.eliminated, names(&["Porto", "Ulsan"]));
                assert!(report.already_eliminated.is_empty());
                assert_eq!(report.not_found, names(&["Atlantis"]));
            }
            other => panic!("expected completed, got {other:?}"),
        }
        assert!(is_eliminated(&db, "Porto"));
        assert!(!is_eliminated(&db, "Chelsea"));

        let second = eliminate_group_stage(&db, &names(&["Chelsea"]), at(27, 13)).unwrap();
        assert_eq!(
            second,
            GroupStageOutcome::AlreadyCompleted {
                completed_at: "2025-06-27T12:00:00Z".into()
            }
        );
        assert!(!is_eliminated(&db, "Chelsea"));

        let rosters = db.player_teams().unwrap();
        let porto = rosters[0].teams.iter().find(|t| t.name == "Porto").unwrap();
        assert_eq!(porto.elimination_reason, Some(EliminationReason::GroupStage));
        assert_eq!(porto.eliminated_at.as_deref(), Some("2025-06-27T12:00:00Z"));
    }

    #[test]
    fn group_stage_reports_already_eliminated_and_uses_aliases() {
        let db = test_db();
        db.import_ownership(&[("Anna".into(), "Inter".into()), ("Anna".into(), "Porto".into())])
            .unwrap();
        db.add_team_alias("Inter Milan", "Inter").unwrap();

        // Porto went out earlier in a knockout match.
        ingest_fixture(&db, &fixture(1, at(28, 16), "Chelsea", "Porto", "FT", (2, 0))).unwrap();
        process_knockout_eliminations(&db, cutoff(), at(29, 0)).unwrap();

        let outcome =
            eliminate_group_stage(&db, &names(&["Inter Milan", "Porto"]), at(29, 1)).unwrap();
        let GroupStageOutcome::Completed(report) = outcome else {
            panic!("expected completed");
        };
        assert_eq!(report.eliminated, names(&["Inter"]));
        assert_eq!(report.already_eliminated, names(&["Porto"]));

        let porto = db.team_by_name("Porto").unwrap().unwrap();
        assert_eq!(porto.elimination_reason, Some(EliminationReason::Knockout));
    }

    // ------------------------------------------------------------------
    // Knockout stage
    // ------------------------------------------------------------------

    #[test]
    fn knockout_does_nothing_before_cutoff() {
        let db = test_db();
        ingest_fixture(&db, &fixture(1, at(20, 16), "A", "B", "FT", (2, 0))).unwrap();
        assert!(process_knockout_eliminations(&db, cutoff(), at(27, 0)).unwrap().is_empty());
        assert!(!is_eliminated(&db, "B"));
    }

    #[test]
    fn knockout_ignores_group_matches_and_eliminates_losers() {
        let db = test_db();
        // Group match before the cutoff: never eliminates.
        ingest_fixture(&db, &fixture(1, at(20, 16), "A", "B", "FT", (2, 0))).unwrap();
        // Knockout matches.
        ingest_fixture(&db, &fixture(2, at(28, 16), "C", "D", "FT", (0, 1))).unwrap();
        let mut pens = fixture(3, at(29, 16), "E", "F", "PEN", (1, 1));
        pens.winner = Some(Side::Home);
        ingest_fixture(&db, &pens).unwrap();
        // Not finished yet.
        ingest_fixture(&db, &fixture(4, at(29, 20), "G", "H", "2H", (0, 3))).unwrap();

        let out = process_knockout_eliminations(&db, cutoff(), at(30, 0)).unwrap();
        assert_eq!(out, names(&["C", "F"]));
        assert!(!is_eliminated(&db, "B"));
        assert!(!is_eliminated(&db, "G"));
        assert_eq!(
            db.team_by_name("F").unwrap().unwrap().elimination_reason,
            Some(EliminationReason::Knockout)
        );
    }

    #[test]
    fn knockout_processing_is_idempotent() {
        let db = test_db();
        ingest_fixture(&db, &fixture(1, at(28, 16), "C", "D", "AET", (2, 1))).unwrap();

        assert_eq!(
            process_knockout_eliminations(&db, cutoff(), at(29, 0)).unwrap(),
            names(&["D"])
        );
        assert!(process_knockout_eliminations(&db, cutoff(), at(29, 1)).unwrap().is_empty());

        let d = db.team_by_name("D").unwrap().unwrap();
        assert_eq!(d.eliminated_at.as_deref(), Some("2025-06-29T00:00:00Z"));
    }

    #[test]
    fn undecided_draw_is_revisited_once_winner_arrives() {
        let db = test_db();
        ingest_fixture(&db, &fixture(1, at(28, 16), "C", "D", "FT", (1, 1))).unwrap();
        assert!(process_knockout_eliminations(&db, cutoff(), at(28, 19)).unwrap().is_empty());

        let mut settled = fixture(1, at(28, 16), "C", "D", "PEN", (1, 1));
        settled.winner = Some(Side::Away);
        ingest_fixture(&db, &settled).unwrap();
        assert_eq!(
            process_knockout_eliminations(&db, cutoff(), at(28, 20)).unwrap(),
            names(&["C"])
        );
    }

    // ------------------------------------------------------------------
    // Reset
    // ------------------------------------------------------------------

    #[test]
    fn reset_clears_flags_and_markers() {
        let db = test_db();
        db.import_ownership(&[("Anna".into(), "Porto".into())]).unwrap();
        eliminate_group_stage(&db, &names(&["Porto"]), at(27, 0)).unwrap();
        ingest_fixture(&db, &fixture(1, at(28, 16), "C", "D", "FT", (3, 0))).unwrap();
        process_knockout_eliminations(&db, cutoff(), at(29, 0)).unwrap();

        assert_eq!(reset_all_eliminations(&db).unwrap(), 2);
        assert!(!is_eliminated(&db, "Porto"));
        assert!(!is_eliminated(&db, "D"));
        assert_eq!(
            db.get_setting(settings::GROUP_STAGE_ELIMINATION_COMPLETED).unwrap(),
            None
        );

        // Both passes can run again.
        assert!(matches!(
            eliminate_group_stage(&db, &names(&["Porto"]), at(29, 1)).unwrap(),
            GroupStageOutcome::Completed(_)
        ));
        assert_eq!(
            process_knockout_eliminations(&db, cutoff(), at(29, 2)).unwrap(),
            names(&["D"])
        );
    }
}
