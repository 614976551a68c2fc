use chrono::{DateTime, NaiveDate, Utc};
use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::api::{ParsedPage, WikiClient};
use crate::bracket::{extract_bracket_entries, extract_matches, extract_placements, has_bracket};
use crate::config::{Config, PipelineConfig};
use crate::error::Result;
use crate::fetchers::{
    self, classify_player, fetch_player_detail, fetch_players_by_page, fetch_team_detail,
};
use crate::governor::{HttpTransport, Transport};
use crate::markup::{augment_from_html, extract_tournament_fields, TournamentFields};
use crate::models::{
    DateRange, MatchRecord, PlayerRecord, RecordSource, TeamRecord, TournamentRecord,
    TournamentStatus,
};
use crate::resolver::resolve_page;
use crate::sync::{RecordSink, SyncJob, SyncKind, SyncLogEntry, SyncStatus};
use crate::utils::{page_id, push_unique};

/// Subpage holding the bracket when the main page only links to it
const PLAYOFFS_SUBPAGE: &str = "Playoffs";

// ============================================================================
// OUTCOMES
// ============================================================================

/// Result of a tournament lookup; "not found" is not an error
#[derive(Debug)]
pub enum TournamentLookup {
    Found(Box<TournamentRecord>),
    NotFound { query: String },
    Failed { query: String, error: String },
}

impl TournamentLookup {
    pub fn record(&self) -> Option<&TournamentRecord> {
        match self {
            TournamentLookup::Found(record) => Some(&**record),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome<T> {
    Completed(T),
    /// Another run of the same kind was in flight; nothing was done
    AlreadyRunning,
}

// ============================================================================
// RUN GUARDS
// ============================================================================

/// One "currently running" flag per sync kind
#[derive(Debug, Default)]
pub struct RunGuards {
    flags: [AtomicBool; SyncKind::ALL.len()],
}

impl RunGuards {
    /// Claims the flag for `kind`, or `None` when a run already holds it
    pub fn try_acquire(&self, kind: SyncKind) -> Option<RunToken<'_>> {
        let flag = &self.flags[kind.index()];
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunToken { flag })
    }

    pub fn is_running(&self, kind: SyncKind) -> bool {
        self.flags[kind.index()].load(Ordering::Acquire)
    }
}

/// Releases its flag when dropped, whichever way the run ended
#[derive(Debug)]
pub struct RunToken<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunToken<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ============================================================================
// STATUS
// ============================================================================

/// Tournament status from its dates relative to `today`
pub fn compute_status(range: &DateRange, today: NaiveDate) -> TournamentStatus {
    match (range.start, range.end) {
        (_, Some(end)) if end < today => TournamentStatus::Concluded,
        (Some(start), Some(end)) if start <= today && today <= end => TournamentStatus::Ongoing,
        (Some(start), None) if start <= today => TournamentStatus::Ongoing,
        (Some(start), _) if start > today => TournamentStatus::Upcoming,
        _ => TournamentStatus::Unknown,
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Composes the client, extractors and fetchers into the public entry points.
/// Owns the run guards; holds no other state between calls.
pub struct Aggregator<T = HttpTransport> {
    client: WikiClient<T>,
    guards: RunGuards,
    settings: PipelineConfig,
    clock: Clock,
}

impl Aggregator<HttpTransport> {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(WikiClient::from_config(config)?, config.pipeline.clone()))
    }
}

impl<T: Transport> Aggregator<T> {
    pub fn new(client: WikiClient<T>, settings: PipelineConfig) -> Self {
        Self {
            client,
            guards: RunGuards::default(),
            settings,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the wall clock, for status computation and sync timestamps
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn client(&self) -> &WikiClient<T> {
        &self.client
    }

    pub fn guards(&self) -> &RunGuards {
        &self.guards
    }

    fn today(&self) -> NaiveDate {
        (self.clock)().date_naive()
    }

    fn limit(&self, limit: Option<usize>) -> usize {
        limit.unwrap_or(self.settings.default_limit)
    }

    // ------------------------------------------------------------------------
    // List entry points
    // ------------------------------------------------------------------------

    pub async fn fetch_teams(&self, game: &str, limit: Option<usize>) -> Vec<TeamRecord> {
        fetchers::fetch_teams(&self.client, game, self.limit(limit)).await
    }

    pub async fn fetch_players(&self, game: &str, limit: Option<usize>) -> Vec<PlayerRecord> {
        fetchers::fetch_players(&self.client, game, self.limit(limit)).await
    }

    pub async fn fetch_tournaments(
        &self,
        game: &str,
        limit: Option<usize>,
    ) -> Vec<TournamentRecord> {
        fetchers::fetch_tournaments(&self.client, game, self.limit(limit), self.today()).await
    }

    pub async fn fetch_recent_matches(&self, game: &str, limit: Option<usize>) -> Vec<MatchRecord> {
        fetchers::fetch_recent_matches(&self.client, game, self.limit(limit)).await
    }

    // ------------------------------------------------------------------------
    // Tournament assembly
    // ------------------------------------------------------------------------

    /// Resolves `name` and assembles the full tournament record
    pub async fn fetch_tournament_by_name(&self, name: &str, game: &str) -> TournamentLookup {
        let Some(deadline) = self.settings.aggregate_deadline() else {
            return self.assemble(name, game).await;
        };
        match tokio::time::timeout(deadline, self.assemble(name, game)).await {
            Ok(lookup) => lookup,
            Err(_) => {
                log::error!("Fetching '{}' exceeded the {:?} deadline", name, deadline);
                TournamentLookup::Failed {
                    query: name.to_string(),
                    error: format!("deadline of {:?} exceeded", deadline),
                }
            }
        }
    }

    async fn assemble(&self, name: &str, game: &str) -> TournamentLookup {
        // RESOLVE
        let similarity = self.settings.min_title_similarity;
        let page = match resolve_page(&self.client, name, game, similarity).await {
            Ok(Some(page)) => page,
            Ok(None) => return TournamentLookup::NotFound { query: name.to_string() },
            Err(e) => {
                return TournamentLookup::Failed {
                    query: name.to_string(),
                    error: e.to_string(),
                }
            }
        };
        log::info!("Assembling '{}' for {}", page.title, game);

        // EXTRACT_FIELDS
        let mut fields = extract_tournament_fields(&page.wikitext);
        if let Some(html) = &page.html {
            augment_from_html(&mut fields, html);
        }
        let mut record = self.tournament_from_fields(&page, name, game, fields);

        // COMPUTE_STATUS
        record.status = compute_status(&record.date_range, self.today());
        log::info!("'{}' is {}", record.canonical_name, record.status.as_str());

        // FETCH_TEAMS
        let mut matches = extract_matches(&page.wikitext);
        let mut team_names = record.participants.clone();
        for team in matches.iter().flat_map(|m| m.teams.iter()) {
            push_unique(&mut team_names, team);
        }
        record.teams = self.fetch_team_details(game, &team_names).await;

        // FETCH_MATCHES
        for m in &mut matches {
            m.tournament = Some(record.canonical_name.clone());
        }
        record.matches = matches;

        if record.status == TournamentStatus::Concluded {
            // FETCH_RESULTS
            record.placements = extract_placements(&page.wikitext);
            record.bracket_entries = extract_bracket_entries(&page.wikitext);
            log::info!(
                "{} placements, {} bracket entries",
                record.placements.len(),
                record.bracket_entries.len()
            );
        } else {
            // FETCH_BRACKETS
            record.bracket_entries = extract_bracket_entries(&page.wikitext);
            if !has_bracket(&page.wikitext) {
                self.fetch_subpage_bracket(game, &mut record).await;
            }
        }

        // FETCH_PLAYERS
        record.players = self.fetch_roster_players(game, &record.teams).await;

        log::info!(
            "Assembled '{}': {} teams, {} matches, {} players",
            record.canonical_name,
            record.teams.len(),
            record.matches.len(),
            record.players.len()
        );
        TournamentLookup::Found(Box::new(record))
    }

    fn tournament_from_fields(
        &self,
        page: &ParsedPage,
        query: &str,
        game: &str,
        fields: TournamentFields,
    ) -> TournamentRecord {
        let url = self.client.page_url(game, &page.title);
        let mut record =
            TournamentRecord::new(page.title.clone(), query, game, url, RecordSource::Markup);
        record.date_range = DateRange {
            start: fields.start_date,
            end: fields.end_date,
        };
        record.prize_pool = fields.prize_pool;
        record.location = fields.location;
        record.organizer = fields.organizer;
        record.sponsors = fields.sponsors;
        record.tier = fields.tier;
        record.team_count = fields.team_count;
        record.participants = fields.participants;
        record.reported_scores = fields.scores;
        record.unparsed_fields = fields.missing.iter().map(|f| f.to_string()).collect();
        record.fetched_at = (self.clock)();
        if !record.unparsed_fields.is_empty() {
            log::info!(
                "'{}': no value for {}",
                record.canonical_name,
                record.unparsed_fields.join(", ")
            );
        }
        record
    }

    /// Team pages in order, spaced; pages past the cap or that fail become name-only records
    async fn fetch_team_details(&self, game: &str, names: &[String]) -> Vec<TeamRecord> {
        let mut teams = Vec::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            if index >= self.settings.max_team_details {
                teams.push(self.name_only_team(game, name));
                continue;
            }
            if index > 0 {
                tokio::time::sleep(self.settings.item_spacing()).await;
            }
            match fetch_team_detail(&self.client, game, name).await {
                Ok(Some(team)) => teams.push(team),
                Ok(None) => {
                    log::debug!("No team page for '{}'", name);
                    teams.push(self.name_only_team(game, name));
                }
                Err(e) => {
                    log::warn!("Team page '{}' failed: {}", name, e);
                    teams.push(self.name_only_team(game, name));
                }
            }
        }
        teams
    }

    fn name_only_team(&self, game: &str, name: &str) -> TeamRecord {
        let url = self.client.page_url(game, name);
        TeamRecord::new(page_id(name), name.to_string(), game, url, RecordSource::Markup)
    }

    async fn fetch_subpage_bracket(&self, game: &str, record: &mut TournamentRecord) {
        let title = format!("{}/{}", record.canonical_name, PLAYOFFS_SUBPAGE);
        tokio::time::sleep(self.settings.item_spacing()).await;

        match self.client.parse_page(game, &title).await {
            Ok(Some(subpage)) => {
                record.bracket_entries.extend(extract_bracket_entries(&subpage.wikitext));
                for mut m in extract_matches(&subpage.wikitext) {
                    m.tournament = Some(record.canonical_name.clone());
                    record.matches.push(m);
                }
                log::info!("{} bracket entries from '{}'", record.bracket_entries.len(), title);
            }
            Ok(None) => log::debug!("No bracket subpage '{}'", title),
            Err(e) => log::warn!("Bracket subpage '{}' failed: {}", title, e),
        }
    }

    /// Players on the fetched rosters: structured rows where they exist,
    /// then parsed player pages (up to `max_player_details`), then the
    /// roster line itself. Roster values fill whatever the page left empty.
    async fn fetch_roster_players(&self, game: &str, teams: &[TeamRecord]) -> Vec<PlayerRecord> {
        let mut ids: Vec<String> = Vec::new();
        for entry in teams.iter().flat_map(|t| t.roster.iter()) {
            push_unique(&mut ids, &entry.id);
        }
        if ids.is_empty() {
            return Vec::new();
        }

        let spacing = self.settings.item_spacing();
        tokio::time::sleep(spacing).await;
        let mut players = fetch_players_by_page(&self.client, game, &ids, spacing).await;
        let mut pages_parsed = 0;

        for team in teams {
            for entry in &team.roster {
                let key = page_id(&entry.id).to_lowercase();
                if players.iter().any(|p| p.external_id.to_lowercase() == key) {
                    continue;
                }

                let detail = if pages_parsed < self.settings.max_player_details {
                    pages_parsed += 1;
                    tokio::time::sleep(spacing).await;
                    self.player_page(game, &entry.id).await
                } else {
                    None
                };
                let mut player = detail.unwrap_or_else(|| {
                    let url = self.client.page_url(game, &entry.id);
                    let id = page_id(&entry.id);
                    PlayerRecord::new(id, entry.id.clone(), game, url, RecordSource::Markup)
                });

                player.real_name = player.real_name.or_else(|| entry.name.clone());
                player.nationality = player.nationality.or_else(|| entry.nationality.clone());
                player.role = player.role.or_else(|| entry.role.clone());
                player.team = player.team.or_else(|| Some(team.name.clone()));
                classify_player(&mut player);
                players.push(player);
            }
        }
        players
    }

    async fn player_page(&self, game: &str, id: &str) -> Option<PlayerRecord> {
        match fetch_player_detail(&self.client, game, id).await {
            Ok(Some(player)) => Some(player),
            Ok(None) => {
                log::debug!("No player page for '{}'", id);
                None
            }
            Err(e) => {
                log::warn!("Player page '{}' failed: {}", id, e);
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------------

    /// Runs `job` under its kind's guard and stores the result in `sink`.
    /// A second run of the same kind returns `AlreadyRunning` without any
    /// remote call.
    pub async fn sync<S: RecordSink>(
        &self,
        job: &SyncJob,
        game: &str,
        limit: Option<usize>,
        sink: &mut S,
    ) -> RunOutcome<SyncLogEntry> {
        let kind = job.kind();
        let Some(_token) = self.guards.try_acquire(kind) else {
            log::warn!("A {} sync is already running, skipping {}", kind, game);
            return RunOutcome::AlreadyRunning;
        };

        let started_at = (self.clock)();
        log::info!("Starting {} sync for {}", kind, game);

        let stored = match job {
            SyncJob::Teams => {
                let teams = self.fetch_teams(game, limit).await;
                sink.upsert_teams(game, &teams).map_err(|e| e.to_string())
            }
            SyncJob::Players => {
                let players = self.fetch_players(game, limit).await;
                sink.upsert_players(game, &players).map_err(|e| e.to_string())
            }
            SyncJob::Tournaments => {
                let tournaments = self.fetch_tournaments(game, limit).await;
                sink.upsert_tournaments(game, &tournaments).map_err(|e| e.to_string())
            }
            SyncJob::Matches => {
                let matches = self.fetch_recent_matches(game, limit).await;
                sink.upsert_matches(game, &matches).map_err(|e| e.to_string())
            }
            SyncJob::Tournament { name } => match self.fetch_tournament_by_name(name, game).await {
                TournamentLookup::Found(record) => {
                    store_tournament(sink, game, &record).map_err(|e| e.to_string())
                }
                TournamentLookup::NotFound { query } => {
                    log::warn!("Tournament '{}' not found for {}", query, game);
                    Ok(0)
                }
                TournamentLookup::Failed { error, .. } => Err(error),
            },
        };

        let (status, count, error) = match stored {
            Ok(0) => (SyncStatus::Empty, 0, None),
            Ok(count) => (SyncStatus::Success, count, None),
            Err(error) => (SyncStatus::Failed, 0, Some(error)),
        };
        let entry = SyncLogEntry {
            kind,
            game: game.to_string(),
            status,
            count,
            error,
            started_at,
            finished_at: (self.clock)(),
        };
        if let Err(e) = sink.record_sync(&entry) {
            log::error!("Could not record {} sync for {}: {}", kind, game, e);
        }
        log::info!("{} sync for {} finished: {} ({} records)", kind, game, status.as_str(), count);
        RunOutcome::Completed(entry)
    }
}

fn store_tournament<S: RecordSink>(
    sink: &mut S,
    game: &str,
    record: &TournamentRecord,
) -> Result<usize> {
    sink.upsert_teams(game, &record.teams)?;
    sink.upsert_players(game, &record.players)?;
    sink.upsert_matches(game, &record.matches)?;
    sink.upsert_tournaments(game, slice::from_ref(record))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_status_from_dates() {
        let range = DateRange {
            start: Some(date(2024, 1, 1)),
            end: Some(date(2024, 1, 10)),
        };
        assert_eq!(compute_status(&range, date(2024, 1, 5)), TournamentStatus::Ongoing);
        assert_eq!(compute_status(&range, date(2024, 2, 1)), TournamentStatus::Concluded);
        assert_eq!(compute_status(&range, date(2023, 12, 1)), TournamentStatus::Upcoming);
        assert_eq!(compute_status(&range, date(2024, 1, 10)), TournamentStatus::Ongoing);
        assert_eq!(
            compute_status(&DateRange::default(), date(2024, 1, 5)),
            TournamentStatus::Unknown
        );
    }

    #[test]
    fn test_status_with_open_end() {
        let range = DateRange {
            start: Some(date(2024, 1, 1)),
            end: None,
        };
        assert_eq!(compute_status(&range, date(2024, 3, 1)), TournamentStatus::Ongoing);
        assert_eq!(compute_status(&range, date(2023, 3, 1)), TournamentStatus::Upcoming);

        let end_only = DateRange {
            start: None,
            end: Some(date(2024, 1, 10)),
        };
        assert_eq!(compute_status(&end_only, date(2024, 2, 1)), TournamentStatus::Concluded);
        assert_eq!(compute_status(&end_only, date(2024, 1, 1)), TournamentStatus::Unknown);
    }

    #[test]
    fn test_run_guard_is_exclusive_per_kind() {
        let guards = RunGuards::default();
        let token = guards.try_acquire(SyncKind::Teams).unwrap();
        assert!(guards.try_acquire(SyncKind::Teams).is_none());
        assert!(guards.try_acquire(SyncKind::Players).is_some());
        assert!(guards.is_running(SyncKind::Teams));

        drop(token);
        assert!(!guards.is_running(SyncKind::Teams));
        assert!(guards.try_acquire(SyncKind::Teams).is_some());
    }
}
