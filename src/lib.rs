pub mod aggregator;
pub mod api;
pub mod bracket;
pub mod config;
pub mod error;
pub mod fetchers;
pub mod governor;
pub mod markup;
pub mod models;
pub mod output;
pub mod resolver;
pub mod sync;
pub mod utils;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================
pub use aggregator::{compute_status, Aggregator, RunGuards, RunOutcome, TournamentLookup};
pub use api::{PageRef, ParsedPage, Row, SearchHit, StructuredQuery, WikiClient};
pub use bracket::{
    extract_bracket_entries, extract_match_list, extract_matches, extract_placements,
};
pub use config::{Config, PipelineConfig, RateLimitConfig, SourceConfig};
pub use error::{Result, ScrapeError};
pub use governor::{ApiRequest, ApiResponse, Governor, HttpTransport, RateClass, Transport};
pub use markup::{
    augment_from_html, extract_player_fields, extract_team_fields, extract_tournament_fields,
    PlayerFields, TeamFields, TournamentFields,
};
pub use models::{
    BracketEntry, DateRange, EntityStatus, MatchRecord, MatchStatus, Placement, PlayerRecord,
    RecordSource, RosterEntry, TeamRecord, TournamentRecord, TournamentStatus,
};
pub use output::{
    print_json, print_matches, print_players, print_teams, print_tournament, print_tournaments,
    CsvSink,
};
pub use resolver::{name_variants, resolve, resolve_page};
pub use sync::{MemorySink, RecordSink, SyncJob, SyncKind, SyncLogEntry, SyncStatus};

/// Games the wiki hosts under their own path, as used in API and page URLs
pub const KNOWN_GAMES: &[&str] = &[
    "counterstrike",
    "valorant",
    "dota2",
    "leagueoflegends",
    "rocketleague",
    "overwatch",
    "rainbowsix",
    "apexlegends",
];

/// True when `game` is one of the wiki paths this crate has been used with
pub fn is_known_game(game: &str) -> bool {
    KNOWN_GAMES.contains(&game)
}
