// API-Football v3 client (via RapidAPI).
//
// Fetches `/fixtures` for one league and season, optionally restricted to a
// date range, and decodes the nested JSON into `FixtureRecord`s. Records that
// fail to decode are logged and skipped so one bad fixture never sinks a
// whole batch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{FetchWindow, FixtureRecord, FixtureSource, FixtureStatus, ScoreLine, SourceError, TeamRef};
use crate::config::Config;
use crate::model::Side;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ApiFootballClient {
    http: reqwest::Client,
    base_url: String,
    api_host: String,
    api_key: String,
    league: u32,
    season: u32,
}

impl ApiFootballClient {
    pub fn new(
        base_url: impl Into<String>,
        api_host: impl Into<String>,
        api_key: impl Into<String>,
        league: u32,
        season: u32,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_host: api_host.into(),
            api_key: api_key.into(),
            league,
            season,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.api.base_url.clone(),
            config.api.host.clone(),
            config.credentials.rapid_api_key.clone(),
            config.tournament.league_id,
            config.tournament.season,
        )
    }
}

#[async_trait]
impl FixtureSource for ApiFootballClient {
    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<FixtureRecord>, SourceError> {
        let mut request = self
            .http
            .get(format!("{}/fixtures", self.base_url))
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", &self.api_host)
            .query(&[
                ("league", self.league.to_string()),
                ("season", self.season.to_string()),
            ]);
        if let FetchWindow::Dates { from, to } = window {
            request = request.query(&[("from", from.to_string()), ("to", to.to_string())]);
        }

        debug!(?window, league = self.league, season = self.season, "requesting fixtures");

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(SourceError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SourceError::Unauthorized)
            }
            status if !status.is_success() => return Err(SourceError::Status(status.as_u16())),
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        parse_fixtures_json(&body)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    errors: Value,
    response: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ApiFixture {
    fixture: ApiFixtureInfo,
    teams: ApiTeams,
    goals: ApiGoals,
    #[serde(default)]
    score: Option<ApiScore>,
}

#[derive(Debug, Deserialize)]
struct ApiFixtureInfo {
    id: i64,
    date: String,
    status: ApiStatus,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    short: String,
}

#[derive(Debug, Deserialize)]
struct ApiTeams {
    home: ApiTeam,
    away: ApiTeam,
}

#[derive(Debug, Deserialize)]
struct ApiTeam {
    id: Option<i64>,
    name: String,
    #[serde(default)]
    winner: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ApiGoals {
    home: Option<u32>,
    away: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiScore {
    #[serde(default)]
    extratime: Option<ApiScorePair>,
    #[serde(default)]
    penalty: Option<ApiScorePair>,
}

#[derive(Debug, Deserialize)]
struct ApiScorePair {
    home: Option<u32>,
    away: Option<u32>,
}

impl ApiScorePair {
    fn score_line(&self) -> Option<ScoreLine> {
        Some(ScoreLine {
            home: self.home?,
            away: self.away?,
        })
    }
}

/// Decode a `/fixtures` response body.
///
/// Envelope-level problems (API `errors` object, missing `response` array,
/// invalid JSON) fail the whole call; individual fixtures that do not decode
/// are skipped with a warning.
pub fn parse_fixtures_json(body: &str) -> Result<Vec<FixtureRecord>, SourceError> {
    let envelope: ApiEnvelope = serde_json::from_str(body)
        .map_err(|e| SourceError::Malformed(format!("invalid JSON: {e}")))?;

    if let Some(err) = classify_api_errors(&envelope.errors) {
        return Err(err);
    }

    let raw = envelope
        .response
        .ok_or_else(|| SourceError::Malformed("missing `response` array".into()))?;

    let mut records = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_value::<ApiFixture>(value)
            .map_err(|e| e.to_string())
            .and_then(decode_fixture)
        {
            Ok(record) => records.push(record),
            Err(e) => warn!("skipping undecodable fixture: {e}"),
        }
    }
    Ok(records)
}

/// API-Football reports request-level failures with HTTP 200 and a non-empty
/// `errors` object (`[]` when there are none).
fn classify_api_errors(errors: &Value) -> Option<SourceError> {
    let map = errors.as_object().filter(|m| !m.is_empty())?;
    if map.contains_key("rateLimit") || map.contains_key("requests") {
        return Some(SourceError::RateLimited);
    }
    if map.contains_key("token") {
        return Some(SourceError::Unauthorized);
    }
    let detail = map
        .iter()
        .map(|(k, v)| format!("{k}: {}", v.as_str().unwrap_or(&v.to_string())))
        .collect::<Vec<_>>()
        .join("; ");
    Some(SourceError::Api(detail))
}

fn decode_fixture(raw: ApiFixture) -> Result<FixtureRecord, String> {
    let kickoff = DateTime::parse_from_rfc3339(&raw.fixture.date)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("fixture {}: bad date {:?}: {e}", raw.fixture.id, raw.fixture.date))?;

    let winner = match (raw.teams.home.winner, raw.teams.away.winner) {
        (Some(true), _) => Some(Side::Home),
        (_, Some(true)) => Some(Side::Away),
        _ => None,
    };

    let (extra_time, penalties) = match &raw.score {
        Some(score) => (
            score.extratime.as_ref().and_then(ApiScorePair::score_line),
            score.penalty.as_ref().and_then(ApiScorePair::score_line),
        ),
        None => (None, None),
    };

    Ok(FixtureRecord {
        external_id: raw.fixture.id,
        kickoff,
        status: FixtureStatus::from_code(&raw.fixture.status.short),
        home: TeamRef {
            external_id: raw.teams.home.id,
            name: raw.teams.home.name,
        },
        away: TeamRef {
            external_id: raw.teams.away.id,
            name: raw.teams.away.name,
        },
        home_goals: raw.goals.home,
        away_goals: raw.goals.away,
        winner,
        penalties,
        extra_time,
    })
}
