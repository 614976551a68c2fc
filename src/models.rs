use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;

// ============================================================================
// STATUS ENUMS
// ============================================================================

/// Lifecycle of a team or player as reported by the wiki
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Active,
    Inactive,
    Retired,
    Disbanded,
    Unknown,
}

impl EntityStatus {
    /// Maps the free-text status of an infobox or query row onto a known status.
    pub fn classify(raw: &str) -> EntityStatus {
        let raw = raw.trim().to_lowercase();
        if raw.is_empty() {
            EntityStatus::Unknown
        } else if raw.contains("disband") || raw.contains("defunct") || raw.contains("dissolved") {
            EntityStatus::Disbanded
        } else if raw.contains("retire") {
            EntityStatus::Retired
        } else if raw.contains("inactive") || raw.contains("former") || raw.contains("free agent") {
            EntityStatus::Inactive
        } else if raw.contains("active") {
            EntityStatus::Active
        } else {
            EntityStatus::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::Inactive => "inactive",
            EntityStatus::Retired => "retired",
            EntityStatus::Disbanded => "disbanded",
            EntityStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    Upcoming,
    Ongoing,
    Concluded,
    Unknown,
}

impl TournamentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TournamentStatus::Upcoming => "upcoming",
            TournamentStatus::Ongoing => "ongoing",
            TournamentStatus::Concluded => "concluded",
            TournamentStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Scheduled,
    Completed,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Completed => "completed",
        }
    }
}

/// Which retrieval path produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    /// Structured bulk query rows
    Structured,
    /// Category enumeration, lower confidence
    Fallback,
    /// Extracted from page markup
    Markup,
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordSource::Structured => "structured",
            RecordSource::Fallback => "fallback",
            RecordSource::Markup => "markup",
        };
        f.write_str(label)
    }
}

// ============================================================================
// TEAMS & PLAYERS
// ============================================================================

/// One line of a team's roster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterEntry {
    pub id: String,
    pub name: Option<String>,
    pub nationality: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamRecord {
    pub external_id: String,
    pub name: String,
    pub game: String,
    pub status: EntityStatus,
    /// Status text as the source wrote it, input to classification
    pub status_text: Option<String>,
    pub disbanded: Option<String>,
    pub location: Option<String>,
    pub region: Option<String>,
    pub roster: Vec<RosterEntry>,
    pub source_url: String,
    pub source: RecordSource,
}

impl TeamRecord {
    pub fn new(
        external_id: String,
        name: String,
        game: &str,
        source_url: String,
        source: RecordSource,
    ) -> TeamRecord {
        TeamRecord {
            external_id,
            name,
            game: game.to_string(),
            status: EntityStatus::Unknown,
            status_text: None,
            disbanded: None,
            location: None,
            region: None,
            roster: Vec::new(),
            source_url,
            source,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerRecord {
    pub external_id: String,
    /// In-game handle
    pub name: String,
    pub real_name: Option<String>,
    pub game: String,
    pub status: EntityStatus,
    pub status_text: Option<String>,
    pub team: Option<String>,
    pub nationality: Option<String>,
    pub role: Option<String>,
    pub source_url: String,
    pub source: RecordSource,
}

impl PlayerRecord {
    pub fn new(
        external_id: String,
        name: String,
        game: &str,
        source_url: String,
        source: RecordSource,
    ) -> PlayerRecord {
        PlayerRecord {
            external_id,
            name,
            real_name: None,
            game: game.to_string(),
            status: EntityStatus::Unknown,
            status_text: None,
            team: None,
            nationality: None,
            role: None,
            source_url,
            source,
        }
    }
}

// ============================================================================
// MATCHES, BRACKETS & RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    pub teams: [String; 2],
    pub scores: [Option<String>; 2],
    pub date: Option<String>,
    pub status: MatchStatus,
    pub winner: Option<String>,
    pub match_id: Option<String>,
    pub tournament: Option<String>,
    pub source: RecordSource,
}

impl MatchRecord {
    /// Completed only when both sides have a score
    pub fn new(teams: [String; 2], scores: [Option<String>; 2]) -> MatchRecord {
        let status = if scores[0].is_some() && scores[1].is_some() {
            MatchStatus::Completed
        } else {
            MatchStatus::Scheduled
        };
        MatchRecord {
            teams,
            scores,
            date: None,
            status,
            winner: None,
            match_id: None,
            tournament: None,
            source: RecordSource::Markup,
        }
    }

    /// Stable key for persistence: tournament, match id or teams, date
    pub fn external_id(&self) -> String {
        let slot = match &self.match_id {
            Some(id) => id.clone(),
            None => format!("{}_vs_{}", self.teams[0], self.teams[1]),
        };
        format!(
            "{}/{}/{}",
            self.tournament.as_deref().unwrap_or("-"),
            slot,
            self.date.as_deref().unwrap_or("-")
        )
        .replace(' ', "_")
    }
}

/// One slot of a bracket template
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BracketEntry {
    pub round: u32,
    pub match_id: String,
    pub teams: [Option<String>; 2],
    /// Combined score such as "2-1"
    pub score: Option<String>,
    pub winner: Option<String>,
    pub status: MatchStatus,
}

/// Final standing from the prize pool table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    pub place: String,
    pub team: String,
    pub prize: Option<String>,
}

// ============================================================================
// TOURNAMENTS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TournamentRecord {
    pub canonical_name: String,
    pub original_query_name: String,
    pub game: String,
    pub status: TournamentStatus,
    pub date_range: DateRange,
    pub prize_pool: Option<String>,
    pub location: Option<String>,
    pub organizer: Option<String>,
    pub sponsors: Vec<String>,
    pub tier: Option<String>,
    pub team_count: Option<u32>,
    pub participants: Vec<String>,
    pub matches: Vec<MatchRecord>,
    pub bracket_entries: Vec<BracketEntry>,
    pub placements: Vec<Placement>,
    pub teams: Vec<TeamRecord>,
    pub players: Vec<PlayerRecord>,
    /// Scorelines only the rendered HTML carried
    pub reported_scores: Vec<String>,
    /// Fields the markup rules could not find
    pub unparsed_fields: Vec<String>,
    pub source_url: String,
    pub source: RecordSource,
    pub fetched_at: DateTime<Utc>,
}

impl TournamentRecord {
    pub fn new(
        canonical_name: String,
        original_query_name: &str,
        game: &str,
        source_url: String,
        source: RecordSource,
    ) -> TournamentRecord {
        TournamentRecord {
            canonical_name,
            original_query_name: original_query_name.to_string(),
            game: game.to_string(),
            status: TournamentStatus::Unknown,
            date_range: DateRange::default(),
            prize_pool: None,
            location: None,
            organizer: None,
            sponsors: Vec::new(),
            tier: None,
            team_count: None,
            participants: Vec::new(),
            matches: Vec::new(),
            bracket_entries: Vec::new(),
            placements: Vec::new(),
            teams: Vec::new(),
            players: Vec::new(),
            reported_scores: Vec::new(),
            unparsed_fields: Vec::new(),
            source_url,
            source,
            fetched_at: Utc::now(),
        }
    }
}
