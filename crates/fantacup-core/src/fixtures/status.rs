// Fixture status codes reported by the fixtures API.

use std::fmt;

use crate::model::MatchStatus;

/// Every short status code the fixtures API is known to emit, plus an
/// explicit `Unknown` for anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FixtureStatus {
    /// `TBD`: kickoff time not yet fixed.
    ToBeDefined,
    /// `NS`
    NotStarted,
    /// `1H`
    FirstHalf,
    /// `HT`
    HalfTime,
    /// `2H`
    SecondHalf,
    /// `ET`
    ExtraTime,
    /// `BT`: break before or during extra time.
    BreakTime,
    /// `P`: shoot-out in progress.
    PenaltiesInProgress,
    /// `SUSP`
    Suspended,
    /// `INT`
    Interrupted,
    /// `LIVE`: in play, phase not reported.
    InPlay,
    /// `FT`
    FullTime,
    /// `AET`
    AfterExtraTime,
    /// `PEN`
    AfterPenalties,
    /// `PST`
    Postponed,
    /// `CANC`
    Cancelled,
    /// `ABD`
    Abandoned,
    /// `AWD`: result awarded by the organiser.
    Awarded,
    /// `WO`
    Walkover,
    Unknown(String),
}

impl FixtureStatus {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "TBD" => FixtureStatus::ToBeDefined,
            "NS" => FixtureStatus::NotStarted,
            "1H" => FixtureStatus::FirstHalf,
            "HT" => FixtureStatus::HalfTime,
            "2H" => FixtureStatus::SecondHalf,
            "ET" => FixtureStatus::ExtraTime,
            "BT" => FixtureStatus::BreakTime,
            "P" => FixtureStatus::PenaltiesInProgress,
            "SUSP" => FixtureStatus::Suspended,
            "INT" => FixtureStatus::Interrupted,
            "LIVE" => FixtureStatus::InPlay,
            "FT" => FixtureStatus::FullTime,
            "AET" => FixtureStatus::AfterExtraTime,
            "PEN" => FixtureStatus::AfterPenalties,
            "PST" => FixtureStatus::Postponed,
            "CANC" => FixtureStatus::Cancelled,
            "ABD" => FixtureStatus::Abandoned,
            "AWD" => FixtureStatus::Awarded,
            "WO" => FixtureStatus::Walkover,
            other => FixtureStatus::Unknown(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            FixtureStatus::ToBeDefined => "TBD",
            FixtureStatus::NotStarted => "NS",
            FixtureStatus::FirstHalf => "1H",
            FixtureStatus::HalfTime => "HT",
            FixtureStatus::SecondHalf => "2H",
            FixtureStatus::ExtraTime => "ET",
            FixtureStatus::BreakTime => "BT",
            FixtureStatus::PenaltiesInProgress => "P",
            FixtureStatus::Suspended => "SUSP",
            FixtureStatus::Interrupted => "INT",
            FixtureStatus::InPlay => "LIVE",
            FixtureStatus::FullTime => "FT",
            FixtureStatus::AfterExtraTime => "AET",
            FixtureStatus::AfterPenalties => "PEN",
            FixtureStatus::Postponed => "PST",
            FixtureStatus::Cancelled => "CANC",
            FixtureStatus::Abandoned => "ABD",
            FixtureStatus::Awarded => "AWD",
            FixtureStatus::Walkover => "WO",
            FixtureStatus::Unknown(code) => code,
        }
    }

    /// Collapse into the internal three-state lifecycle. Administrative
    /// outcomes count as finished; unknown codes are stored as scheduled.
    pub fn match_status(&self) -> MatchStatus {
        match self {
            FixtureStatus::ToBeDefined
            | FixtureStatus::NotStarted
            | FixtureStatus::Unknown(_) => MatchStatus::Scheduled,
            FixtureStatus::FirstHalf
            | FixtureStatus::HalfTime
            | FixtureStatus::SecondHalf
            | FixtureStatus::ExtraTime
            | FixtureStatus::BreakTime
            | FixtureStatus::PenaltiesInProgress
            | FixtureStatus::Suspended
            | FixtureStatus::Interrupted
            | FixtureStatus::InPlay => MatchStatus::Live,
            FixtureStatus::FullTime
            | FixtureStatus::AfterExtraTime
            | FixtureStatus::AfterPenalties
            | FixtureStatus::Postponed
            | FixtureStatus::Cancelled
            | FixtureStatus::Abandoned
            | FixtureStatus::Awarded
            | FixtureStatus::Walkover => MatchStatus::Finished,
        }
    }

    /// True when the final code says the match went past regulation time.
    pub fn decided_after_regulation(&self) -> bool {
        matches!(
            self,
            FixtureStatus::AfterExtraTime | FixtureStatus::AfterPenalties
        )
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, FixtureStatus::Unknown(_))
    }
}

impl fmt::Display for FixtureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
