// Request dispatch: maps protocol requests onto store queries and
// coordinator operations.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use fantacup_core::elimination::GroupStageOutcome;
use fantacup_core::model::to_db_time;

use crate::protocol::{ActionResponse, Request, Response};
use crate::updater::{FullUpdateSummary, TriggerOutcome, UpdateCoordinator, UpdateError};

pub struct Api {
    coordinator: Arc<UpdateCoordinator>,
}

impl Api {
    pub fn new(coordinator: Arc<UpdateCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Parse one text frame and answer it. Malformed input yields an
    /// `ERROR` response rather than closing the connection.
    pub async fn handle_text(&self, text: &str) -> Response {
        match serde_json::from_str::<Request>(text) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!("failed to parse request: {e}");
                Response::Error {
                    message: format!("invalid request: {e}"),
                }
            }
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let action = request.name();
        let db = self.coordinator.db();

        match request {
            // ----- Reads -----
            Request::UpcomingMatches => read(db.upcoming_matches(), |matches| {
                Response::UpcomingMatches { matches }
            }),
            Request::TodaysMatches => {
                let today = Utc::now().date_naive();
                read(db.todays_matches(today), |matches| Response::TodaysMatches {
                    date: today.to_string(),
                    matches,
                })
            }
            Request::FinishedMatches => read(db.finished_matches(), |matches| {
                Response::FinishedMatches { matches }
            }),
            Request::Leaderboard => read(db.leaderboard(), |entries| Response::Leaderboard { entries }),
            Request::PlayerTeams => read(db.player_teams(), |players| Response::PlayerTeams { players }),
            Request::Status => read(self.coordinator.status(), Response::Status),

            // ----- Writes -----
            Request::UpdateSchedule => {
                info!("schedule update requested");
                match self.coordinator.run_schedule_update().await {
                    Ok(TriggerOutcome::Completed(summary)) => succeeded(
                        action,
                        format!(
                            "Schedule updated: {} new, {} updated, {} failed",
                            summary.created, summary.updated, summary.failed
                        ),
                        &summary,
                    ),
                    Ok(TriggerOutcome::AlreadyRunning { since }) => already_running(action, since),
                    Err(e) => update_failed(action, e),
                }
            }
            Request::UpdateResults => {
                info!("results update requested");
                match self.coordinator.run_results_update().await {
                    Ok(TriggerOutcome::Completed(summary)) => succeeded(
                        action,
                        format!(
                            "Results updated: {} updated, {} newly finished, {} failed",
                            summary.updated, summary.newly_finished, summary.failed
                        ),
                        &summary,
                    ),
                    Ok(TriggerOutcome::AlreadyRunning { since }) => already_running(action, since),
                    Err(e) => update_failed(action, e),
                }
            }
            Request::UpdateAll => {
                info!("full update requested");
                match self.coordinator.run_full_update().await {
                    Ok(summary) => full_update(action, summary),
                    Err(e) => update_failed(action, e),
                }
            }
            Request::RecalculateLeaderboard => match self.coordinator.recalculate_leaderboard() {
                Ok(entries) => succeeded(
                    action,
                    format!("Leaderboard recalculated for {} players", entries.len()),
                    &entries,
                ),
                Err(e) => failed(action, "Leaderboard recalculation failed", format!("{e:#}")),
            },
            Request::EliminateGroupStage { teams } => {
                match self.coordinator.eliminate_group_stage(&teams) {
                    Ok(GroupStageOutcome::AlreadyCompleted { completed_at }) => skipped(
                        action,
                        format!("Group-stage elimination already completed at {completed_at}"),
                        &GroupStageOutcome::AlreadyCompleted { completed_at },
                    ),
                    Ok(GroupStageOutcome::Completed(report)) => succeeded(
                        action,
                        format!(
                            "Eliminated {} teams ({} already out, {} not found)",
                            report.eliminated.len(),
                            report.already_eliminated.len(),
                            report.not_found.len()
                        ),
                        &report,
                    ),
                    Err(e) => failed(action, "Group-stage elimination failed", format!("{e:#}")),
                }
            }
            Request::ResetEliminations => match self.coordinator.reset_eliminations() {
                Ok(count) => succeeded(
                    action,
                    format!("Reset eliminations for {count} teams"),
                    &serde_json::json!({ "teams_reset": count }),
                ),
                Err(e) => failed(action, "Elimination reset failed", format!("{e:#}")),
            },
            Request::ClearLocks => {
                let cleared = self.coordinator.force_clear_locks();
                succeeded(
                    action,
                    format!("Cleared {} running job lock(s)", cleared.len()),
                    &serde_json::json!({ "cleared": cleared }),
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Response builders
// ---------------------------------------------------------------------------

fn read<T>(result: anyhow::Result<T>, wrap: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => wrap(value),
        Err(e) => {
            warn!("query failed: {e:#}");
            Response::Error {
                message: format!("{e:#}"),
            }
        }
    }
}

fn succeeded(action: &str, message: String, details: &impl Serialize) -> Response {
    action_result(action, true, message, details_value(details), None)
}

/// Nothing was done, and nothing went wrong either.
fn skipped(action: &str, message: String, details: &impl Serialize) -> Response {
    action_result(action, false, message, details_value(details), None)
}

fn failed(action: &str, message: &str, error: String) -> Response {
    action_result(action, false, message.to_string(), None, Some(error))
}

fn already_running(action: &str, since: String) -> Response {
    let message = format!("Update already in progress since {since}");
    skipped(action, message, &TriggerOutcome::<()>::AlreadyRunning { since })
}

fn update_failed(action: &str, e: UpdateError) -> Response {
    let message = match &e {
        UpdateError::Fetch { .. } => "Fixture fetch failed",
        UpdateError::Store(_) => "Storing the update failed",
    };
    failed(action, message, format!("{e:#}"))
}

fn full_update(action: &str, summary: FullUpdateSummary) -> Response {
    let half = |name: &str, since: Option<&String>| match since {
        Some(since) => format!("{name} already in progress since {since}"),
        None => format!("{name} completed"),
    };
    let schedule_busy = match &summary.schedule {
        TriggerOutcome::AlreadyRunning { since } => Some(since),
        TriggerOutcome::Completed(_) => None,
    };
    let results_busy = match &summary.results {
        TriggerOutcome::AlreadyRunning { since } => Some(since),
        TriggerOutcome::Completed(_) => None,
    };
    let message = format!(
        "{}; {}",
        half("Schedule update", schedule_busy),
        half("results update", results_busy)
    );
    if schedule_busy.is_none() && results_busy.is_none() {
        succeeded(action, message, &summary)
    } else {
        skipped(action, message, &summary)
    }
}

fn action_result(
    action: &str,
    success: bool,
    message: String,
    details: Option<serde_json::Value>,
    error: Option<String>,
) -> Response {
    Response::ActionResult(ActionResponse {
        action: action.to_string(),
        success,
        timestamp: to_db_time(Utc::now()),
        message,
        details,
        error,
    })
}

fn details_value(details: &impl Serialize) -> Option<serde_json::Value> {
    match serde_json::to_value(details) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("failed to serialize action details: {e}");
            None
        }
    }
}
