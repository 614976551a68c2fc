use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{MatchRecord, PlayerRecord, TeamRecord, TournamentRecord};
use crate::sync::{RecordSink, SyncLogEntry};
use crate::utils::page_id;

const TEAMS_CSV_FILE: &str = "teams.csv";
const PLAYERS_CSV_FILE: &str = "players.csv";
const MATCHES_CSV_FILE: &str = "matches.csv";
const TOURNAMENTS_CSV_FILE: &str = "tournaments.csv";
const SYNC_LOG_CSV_FILE: &str = "sync_log.csv";

const TEAM_HEADER: &[&str] = &[
    "external_id",
    "game",
    "name",
    "status",
    "location",
    "region",
    "disbanded",
    "roster",
    "source",
    "source_url",
];
const PLAYER_HEADER: &[&str] = &[
    "external_id",
    "game",
    "name",
    "real_name",
    "status",
    "team",
    "nationality",
    "role",
    "source",
    "source_url",
];
const MATCH_HEADER: &[&str] = &[
    "external_id",
    "game",
    "team1",
    "team2",
    "score1",
    "score2",
    "date",
    "status",
    "winner",
    "tournament",
    "source",
];
const TOURNAMENT_HEADER: &[&str] = &[
    "external_id",
    "game",
    "name",
    "query",
    "status",
    "start_date",
    "end_date",
    "prize_pool",
    "location",
    "organizer",
    "tier",
    "team_count",
    "participants",
    "sponsors",
    "source",
    "source_url",
    "fetched_at",
];
const SYNC_LOG_HEADER: &[&str] = &[
    "kind",
    "game",
    "status",
    "count",
    "error",
    "started_at",
    "finished_at",
];

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

// ============================================================================
// STDOUT OUTPUT
// ============================================================================

/// Pretty JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_teams(teams: &[TeamRecord]) {
    println!("{} teams", teams.len());
    println!("{:-<80}", "");
    for team in teams {
        println!(
            "{:30} {:10} {:20} [{}]",
            team.name,
            team.status.as_str(),
            team.region.as_deref().or(team.location.as_deref()).unwrap_or("-"),
            team.source
        );
        if !team.roster.is_empty() {
            let ids: Vec<&str> = team.roster.iter().map(|p| p.id.as_str()).collect();
            println!("    Roster: {}", ids.join(", "));
        }
    }
}

pub fn print_players(players: &[PlayerRecord]) {
    println!("{} players", players.len());
    println!("{:-<80}", "");
    for player in players {
        println!(
            "{:20} {:25} {:10} {:20} [{}]",
            player.name,
            player.team.as_deref().unwrap_or("-"),
            player.status.as_str(),
            player.nationality.as_deref().unwrap_or("-"),
            player.source
        );
    }
}

pub fn print_matches(matches: &[MatchRecord]) {
    println!("{} matches", matches.len());
    println!("{:-<80}", "");
    for m in matches {
        let score = match &m.scores {
            [Some(a), Some(b)] => format!("{}-{}", a, b),
            _ => "vs".to_string(),
        };
        println!(
            "{:>25} {:^7} {:25} {:10} {}",
            m.teams[0],
            score,
            m.teams[1],
            m.status.as_str(),
            m.date.as_deref().unwrap_or("")
        );
    }
}

pub fn print_tournaments(tournaments: &[TournamentRecord]) {
    println!("{} tournaments", tournaments.len());
    println!("{:-<80}", "");
    for t in tournaments {
        let start = t.date_range.start.map(|d| d.to_string()).unwrap_or_else(|| "?".to_string());
        println!(
            "{:45} {:10} {:10} {}",
            t.canonical_name,
            t.status.as_str(),
            start,
            t.prize_pool.as_deref().unwrap_or("")
        );
    }
}

/// Full tournament report
pub fn print_tournament(t: &TournamentRecord) {
    println!("\n{} ({})", t.canonical_name, t.status.as_str());
    println!("{:-<80}", "");
    if let (Some(start), end) = (t.date_range.start, t.date_range.end) {
        match end {
            Some(end) => println!("Dates: {} to {}", start, end),
            None => println!("Dates: from {}", start),
        }
    }
    for (label, value) in [
        ("Prize pool", &t.prize_pool),
        ("Location", &t.location),
        ("Organizer", &t.organizer),
        ("Tier", &t.tier),
    ] {
        if let Some(value) = value {
            println!("{}: {}", label, value);
        }
    }
    if !t.sponsors.is_empty() {
        println!("Sponsors: {}", t.sponsors.join(", "));
    }
    if !t.participants.is_empty() {
        println!("Participants ({}): {}", t.participants.len(), t.participants.join(", "));
    }

    if !t.placements.is_empty() {
        println!("\nResults:");
        for p in &t.placements {
            println!("  {:6} {:30} {}", p.place, p.team, p.prize.as_deref().unwrap_or(""));
        }
    }
    if !t.bracket_entries.is_empty() {
        println!("\nBracket:");
        for entry in &t.bracket_entries {
            println!(
                "  {:7} {} vs {} {} {}",
                entry.match_id,
                entry.teams[0].as_deref().unwrap_or("TBD"),
                entry.teams[1].as_deref().unwrap_or("TBD"),
                entry.score.as_deref().unwrap_or(""),
                entry.winner.as_deref().map(|w| format!("(winner: {})", w)).unwrap_or_default()
            );
        }
    }
    if !t.matches.is_empty() {
        println!();
        print_matches(&t.matches);
    }
    if !t.unparsed_fields.is_empty() {
        println!("\nNot found on page: {}", t.unparsed_fields.join(", "));
    }
}

// ============================================================================
// CSV SINK
// ============================================================================

/// One CSV file of rows keyed by (external id, game)
struct CsvTable {
    path: PathBuf,
    header: &'static [&'static str],
    rows: BTreeMap<(String, String), Vec<String>>,
}

impl CsvTable {
    fn open(dir: &Path, file: &str, header: &'static [&'static str]) -> Result<Self> {
        let path = dir.join(file);
        let mut rows = BTreeMap::new();
        if path.exists() {
            let mut reader = csv::Reader::from_path(&path)?;
            for record in reader.records() {
                let row: Vec<String> = record?.iter().map(str::to_string).collect();
                if row.len() >= 2 {
                    rows.insert((row[0].clone(), row[1].clone()), row);
                }
            }
        }
        Ok(CsvTable { path, header, rows })
    }

    fn upsert(&mut self, rows: impl IntoIterator<Item = Vec<String>>) -> Result<usize> {
        let mut count = 0;
        for row in rows {
            self.rows.insert((row[0].clone(), row[1].clone()), row);
            count += 1;
        }
        self.write()?;
        Ok(count)
    }

    fn write(&self) -> Result<()> {
        let mut writer = csv::Writer::from_writer(File::create(&self.path)?);
        writer.write_record(self.header)?;
        for row in self.rows.values() {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// File-backed sink: one CSV per record kind, rewritten on every upsert,
/// plus an append-only sync log
pub struct CsvSink {
    dir: PathBuf,
    teams: CsvTable,
    players: CsvTable,
    matches: CsvTable,
    tournaments: CsvTable,
}

impl CsvSink {
    /// Opens `dir`, creating it if needed and loading rows already stored there
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(CsvSink {
            teams: CsvTable::open(&dir, TEAMS_CSV_FILE, TEAM_HEADER)?,
            players: CsvTable::open(&dir, PLAYERS_CSV_FILE, PLAYER_HEADER)?,
            matches: CsvTable::open(&dir, MATCHES_CSV_FILE, MATCH_HEADER)?,
            tournaments: CsvTable::open(&dir, TOURNAMENTS_CSV_FILE, TOURNAMENT_HEADER)?,
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RecordSink for CsvSink {
    fn upsert_teams(&mut self, game: &str, teams: &[TeamRecord]) -> Result<usize> {
        let rows = teams.iter().map(|t| {
            vec![
                t.external_id.clone(),
                game.to_string(),
                t.name.clone(),
                t.status.as_str().to_string(),
                opt(&t.location),
                opt(&t.region),
                opt(&t.disbanded),
                t.roster.iter().map(|p| p.id.as_str()).collect::<Vec<_>>().join("|"),
                t.source.to_string(),
                t.source_url.clone(),
            ]
        });
        self.teams.upsert(rows)
    }

    fn upsert_players(&mut self, game: &str, players: &[PlayerRecord]) -> Result<usize> {
        let rows = players.iter().map(|p| {
            vec![
                p.external_id.clone(),
                game.to_string(),
                p.name.clone(),
                opt(&p.real_name),
                p.status.as_str().to_string(),
                opt(&p.team),
                opt(&p.nationality),
                opt(&p.role),
                p.source.to_string(),
                p.source_url.clone(),
            ]
        });
        self.players.upsert(rows)
    }

    fn upsert_matches(&mut self, game: &str, matches: &[MatchRecord]) -> Result<usize> {
        let rows = matches.iter().map(|m| {
            vec![
                m.external_id(),
                game.to_string(),
                m.teams[0].clone(),
                m.teams[1].clone(),
                opt(&m.scores[0]),
                opt(&m.scores[1]),
                opt(&m.date),
                m.status.as_str().to_string(),
                opt(&m.winner),
                opt(&m.tournament),
                m.source.to_string(),
            ]
        });
        self.matches.upsert(rows)
    }

    fn upsert_tournaments(
        &mut self,
        game: &str,
        tournaments: &[TournamentRecord],
    ) -> Result<usize> {
        let rows = tournaments.iter().map(|t| {
            vec![
                page_id(&t.canonical_name),
                game.to_string(),
                t.canonical_name.clone(),
                t.original_query_name.clone(),
                t.status.as_str().to_string(),
                t.date_range.start.map(|d| d.to_string()).unwrap_or_default(),
                t.date_range.end.map(|d| d.to_string()).unwrap_or_default(),
                opt(&t.prize_pool),
                opt(&t.location),
                opt(&t.organizer),
                opt(&t.tier),
                t.team_count.map(|n| n.to_string()).unwrap_or_default(),
                t.participants.join("|"),
                t.sponsors.join("|"),
                t.source.to_string(),
                t.source_url.clone(),
                t.fetched_at.to_rfc3339(),
            ]
        });
        self.tournaments.upsert(rows)
    }

    fn record_sync(&mut self, entry: &SyncLogEntry) -> Result<()> {
        let path = self.dir.join(SYNC_LOG_CSV_FILE);
        let is_new = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer.write_record(SYNC_LOG_HEADER)?;
        }
        writer.write_record([
            entry.kind.as_str().to_string(),
            entry.game.clone(),
            entry.status.as_str().to_string(),
            entry.count.to_string(),
            entry.error.clone().unwrap_or_default(),
            entry.started_at.to_rfc3339(),
            entry.finished_at.to_rfc3339(),
        ])?;
        writer.flush()?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityStatus, RecordSource};
    use crate::sync::{SyncKind, SyncStatus};
    use chrono::Utc;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir_name = format!("esports_wiki_scraper_{}_{}", name, std::process::id());
        let dir = std::env::temp_dir().join(dir_name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_csv_sink_upserts_across_reopen() {
        let dir = scratch_dir("upsert");
        let mut team = TeamRecord::new(
            "ORDER".into(),
            "ORDER".into(),
            "counterstrike",
            String::new(),
            RecordSource::Structured,
        );

        let mut sink = CsvSink::open(&dir).unwrap();
        sink.upsert_teams("counterstrike", &[team.clone()]).unwrap();

        team.status = EntityStatus::Disbanded;
        let mut reopened = CsvSink::open(&dir).unwrap();
        reopened.upsert_teams("counterstrike", &[team.clone()]).unwrap();
        reopened.upsert_teams("valorant", &[team]).unwrap();

        let content = fs::read_to_string(dir.join(TEAMS_CSV_FILE)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3, "header plus one row per (id, game)");
        assert!(lines[1].starts_with("ORDER,counterstrike,ORDER,disbanded"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_sync_log_appends_with_single_header() {
        let dir = scratch_dir("synclog");
        let mut sink = CsvSink::open(&dir).unwrap();
        let entry = SyncLogEntry {
            kind: SyncKind::Teams,
            game: "counterstrike".into(),
            status: SyncStatus::Empty,
            count: 0,
            error: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        sink.record_sync(&entry).unwrap();
        sink.record_sync(&entry).unwrap();

        let content = fs::read_to_string(dir.join(SYNC_LOG_CSV_FILE)).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.starts_with("kind,game,status"));
        let _ = fs::remove_dir_all(&dir);
    }
}
