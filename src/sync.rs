use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::error::Result;
use crate::models::{MatchRecord, PlayerRecord, TeamRecord, TournamentRecord};

// ============================================================================
// SYNC JOBS
// ============================================================================

/// Operation kinds; at most one run of each kind is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Teams,
    Players,
    Tournaments,
    Matches,
    Tournament,
}

impl SyncKind {
    pub const ALL: [SyncKind; 5] = [
        SyncKind::Teams,
        SyncKind::Players,
        SyncKind::Tournaments,
        SyncKind::Matches,
        SyncKind::Tournament,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Teams => "teams",
            SyncKind::Players => "players",
            SyncKind::Tournaments => "tournaments",
            SyncKind::Matches => "matches",
            SyncKind::Tournament => "tournament",
        }
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sync request as issued by the CLI or the watch loop
#[derive(Debug, Clone, PartialEq)]
pub enum SyncJob {
    Teams,
    Players,
    Tournaments,
    Matches,
    Tournament { name: String },
}

impl SyncJob {
    pub fn kind(&self) -> SyncKind {
        match self {
            SyncJob::Teams => SyncKind::Teams,
            SyncJob::Players => SyncKind::Players,
            SyncJob::Tournaments => SyncKind::Tournaments,
            SyncJob::Matches => SyncKind::Matches,
            SyncJob::Tournament { .. } => SyncKind::Tournament,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Records were fetched and stored
    Success,
    /// The run finished but produced nothing to store
    Empty,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Empty => "empty",
            SyncStatus::Failed => "failed",
        }
    }
}

/// Outcome of one sync run, recorded by the sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncLogEntry {
    pub kind: SyncKind,
    pub game: String,
    pub status: SyncStatus,
    pub count: usize,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ============================================================================
// PERSISTENCE SEAM
// ============================================================================

/// Idempotent storage for fetched records, keyed by (external id, game)
pub trait RecordSink {
    fn upsert_teams(&mut self, game: &str, teams: &[TeamRecord]) -> Result<usize>;
    fn upsert_players(&mut self, game: &str, players: &[PlayerRecord]) -> Result<usize>;
    fn upsert_matches(&mut self, game: &str, matches: &[MatchRecord]) -> Result<usize>;
    fn upsert_tournaments(
        &mut self,
        game: &str,
        tournaments: &[TournamentRecord],
    ) -> Result<usize>;
    fn record_sync(&mut self, entry: &SyncLogEntry) -> Result<()>;
}

/// Keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub teams: Vec<TeamRecord>,
    pub players: Vec<PlayerRecord>,
    pub matches: Vec<MatchRecord>,
    pub tournaments: Vec<TournamentRecord>,
    pub log: Vec<SyncLogEntry>,
}

fn upsert_by<R: Clone>(stored: &mut Vec<R>, incoming: &[R], key: impl Fn(&R) -> String) -> usize {
    for record in incoming {
        let id = key(record);
        match stored.iter_mut().find(|existing| key(existing) == id) {
            Some(existing) => *existing = record.clone(),
            None => stored.push(record.clone()),
        }
    }
    incoming.len()
}

impl RecordSink for MemorySink {
    fn upsert_teams(&mut self, game: &str, teams: &[TeamRecord]) -> Result<usize> {
        Ok(upsert_by(&mut self.teams, teams, |t| format!("{}/{}", game, t.external_id)))
    }

    fn upsert_players(&mut self, game: &str, players: &[PlayerRecord]) -> Result<usize> {
        Ok(upsert_by(&mut self.players, players, |p| format!("{}/{}", game, p.external_id)))
    }

    fn upsert_matches(&mut self, game: &str, matches: &[MatchRecord]) -> Result<usize> {
        Ok(upsert_by(&mut self.matches, matches, |m| format!("{}/{}", game, m.external_id())))
    }

    fn upsert_tournaments(
        &mut self,
        game: &str,
        tournaments: &[TournamentRecord],
    ) -> Result<usize> {
        let key = |t: &TournamentRecord| format!("{}/{}", game, t.canonical_name);
        Ok(upsert_by(&mut self.tournaments, tournaments, key))
    }

    fn record_sync(&mut self, entry: &SyncLogEntry) -> Result<()> {
        self.log.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordSource;

    #[test]
    fn test_memory_sink_upserts_by_external_id() {
        let mut sink = MemorySink::default();
        let first = TeamRecord::new(
            "ORDER".into(),
            "ORDER".into(),
            "counterstrike",
            String::new(),
            RecordSource::Fallback,
        );
        let mut second = first.clone();
        second.region = Some("Oceania".into());

        sink.upsert_teams("counterstrike", &[first]).unwrap();
        sink.upsert_teams("counterstrike", &[second]).unwrap();
        assert_eq!(sink.teams.len(), 1);
        assert_eq!(sink.teams[0].region.as_deref(), Some("Oceania"));
    }

    #[test]
    fn test_job_kinds() {
        let job = SyncJob::Tournament { name: "IEM Katowice 2024".into() };
        assert_eq!(job.kind(), SyncKind::Tournament);
        assert_eq!(SyncKind::ALL[SyncKind::Matches.index()], SyncKind::Matches);
    }
}
