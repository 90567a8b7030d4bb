// JSON messages exchanged with the frontend over WebSocket.
//
// Every message is an object tagged by `"type"`, e.g.
// `{"type":"ELIMINATE_GROUP_STAGE","teams":["Porto"]}`.

use serde::{Deserialize, Serialize};

use fantacup_core::model::{LeaderboardEntry, MatchView, PlayerRoster};

use crate::updater::StatusReport;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    // Reads
    UpcomingMatches,
    TodaysMatches,
    FinishedMatches,
    Leaderboard,
    PlayerTeams,
    Status,

    // Writes
    UpdateSchedule,
    UpdateResults,
    /// Schedule sync then results update.
    UpdateAll,
    RecalculateLeaderboard,
    EliminateGroupStage { teams: Vec<String> },
    ResetEliminations,
    ClearLocks,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::UpcomingMatches => "UPCOMING_MATCHES",
            Request::TodaysMatches => "TODAYS_MATCHES",
            Request::FinishedMatches => "FINISHED_MATCHES",
            Request::Leaderboard => "LEADERBOARD",
            Request::PlayerTeams => "PLAYER_TEAMS",
            Request::Status => "STATUS",
            Request::UpdateSchedule => "UPDATE_SCHEDULE",
            Request::UpdateResults => "UPDATE_RESULTS",
            Request::UpdateAll => "UPDATE_ALL",
            Request::RecalculateLeaderboard => "RECALCULATE_LEADERBOARD",
            Request::EliminateGroupStage { .. } => "ELIMINATE_GROUP_STAGE",
            Request::ResetEliminations => "RESET_ELIMINATIONS",
            Request::ClearLocks => "CLEAR_LOCKS",
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    UpcomingMatches { matches: Vec<MatchView> },
    TodaysMatches { date: String, matches: Vec<MatchView> },
    FinishedMatches { matches: Vec<MatchView> },
    Leaderboard { entries: Vec<LeaderboardEntry> },
    PlayerTeams { players: Vec<PlayerRoster> },
    Status(StatusReport),
    /// Result of any write request.
    ActionResult(ActionResponse),
    /// The request could not be parsed or a read failed.
    Error { message: String },
}

/// Body of a write response. Every response carries a message. `details`
/// holds the summary, or an `outcome` object when the action was skipped
/// (`already_running`, `already_completed`). `error` is set only when the
/// action actually failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResponse {
    pub action: String,
    pub success: bool,
    pub timestamp: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_unit_requests() {
        let req: Request = serde_json::from_str(r#"{"type":"LEADERBOARD"}"#).unwrap();
        assert_eq!(req, Request::Leaderboard);
        let req: Request = serde_json::from_str(r#"{"type":"CLEAR_LOCKS"}"#).unwrap();
        assert_eq!(req, Request::ClearLocks);
    }

    #[test]
    fn parses_group_stage_request() {
        let req: Request =
            serde_json::from_str(r#"{"type":"ELIMINATE_GROUP_STAGE","teams":["Porto","Ulsan"]}"#)
                .unwrap();
        assert_eq!(
            req,
            Request::EliminateGroupStage {
                teams: vec!["Porto".into(), "Ulsan".into()]
            }
        );
        assert_eq!(req.name(), "ELIMINATE_GROUP_STAGE");
    }

    #[test]
    fn parses_update_all() {
        let req: Request = serde_json::from_str(r#"{"type":"UPDATE_ALL"}"#).unwrap();
        assert_eq!(req, Request::UpdateAll);
        assert_eq!(req.name(), "UPDATE_ALL");
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(serde_json::from_str::<Request>(r#"{"type":"DROP_TABLES"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"type":"ELIMINATE_GROUP_STAGE"}"#).is_err());
    }

    #[test]
    fn action_response_shape() {
        let ok = Response::ActionResult(ActionResponse {
            action: "CLEAR_LOCKS".into(),
            success: true,
            timestamp: "2025-06-20T10:00:00Z".into(),
            message: "cleared".into(),
            details: None,
            error: None,
        });
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({
                "type": "ACTION_RESULT",
                "action": "CLEAR_LOCKS",
                "success": true,
                "timestamp": "2025-06-20T10:00:00Z",
                "message": "cleared"
            })
        );
    }

    #[test]
    fn error_response_shape() {
        let err = Response::Error {
            message: "bad".into(),
        };
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({ "type": "ERROR", "message": "bad" })
        );
    }
}
