use chrono::NaiveDate;
use std::future::Future;
use std::time::Duration;

use crate::aggregator::compute_status;
use crate::api::{PageRef, Row, StructuredQuery, WikiClient};
use crate::bracket::extract_match_list;
use crate::error::{Result, ScrapeError};
use crate::governor::Transport;
use crate::markup::{extract_player_fields, extract_team_fields, PlayerFields, TeamFields};
use crate::models::{
    DateRange, EntityStatus, MatchRecord, MatchStatus, PlayerRecord, RecordSource, TeamRecord,
    TournamentRecord,
};
use crate::utils::{page_id, parse_wiki_date};

/// Page listing recent and upcoming matches when the match table is empty
pub const MATCHES_PAGE: &str = "Liquipedia:Matches";

/// Player ids per structured lookup
const PLAYER_BATCH: usize = 20;

// ============================================================================
// TWO-STAGE FETCH
// ============================================================================

/// Runs the structured stage, then the fallback stage when it came back empty.
/// Failures of either stage are logged and count as an empty result.
async fn with_fallback<R, S, F, Fut>(
    entity: &str,
    game: &str,
    structured: S,
    fallback: F,
) -> Vec<R>
where
    S: Future<Output = Result<Vec<R>>>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<R>>>,
{
    let records = match structured.await {
        Ok(records) => records,
        Err(e) => {
            log_failure(entity, game, "structured query", &e);
            Vec::new()
        }
    };
    if !records.is_empty() {
        log::info!("Fetched {} {} for {} from structured data", records.len(), entity, game);
        return records;
    }

    log::info!("No structured {} for {}, falling back", entity, game);
    match fallback().await {
        Ok(records) => {
            log::info!("Fallback found {} {} for {}", records.len(), entity, game);
            records
        }
        Err(e) => {
            log_failure(entity, game, "fallback", &e);
            Vec::new()
        }
    }
}

fn log_failure(entity: &str, game: &str, stage: &str, error: &ScrapeError) {
    if error.is_throttled() {
        log::warn!("Throttled during {} {} for {}: {}", entity, stage, game, error);
    } else {
        log::error!("{} {} failed for {}: {}", entity, stage, game, error);
    }
}

fn field(row: &Row, key: &str) -> Option<String> {
    row.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

async fn category_pages<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    category: &str,
    limit: usize,
) -> Result<Vec<PageRef>> {
    let cap = limit.min(client.fallback_cap());
    client.category_members(game, category, cap).await
}

// ============================================================================
// TEAMS
// ============================================================================

const TEAM_FIELDS: &[&str] = &[
    "_pageName=pagename",
    "name=name",
    "status=status",
    "location=location",
    "region=region",
    "disbanddate=disbanddate",
];

pub async fn fetch_teams<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    limit: usize,
) -> Vec<TeamRecord> {
    let query = StructuredQuery::new("Teams", TEAM_FIELDS, limit).order_by("Teams._pageName ASC");

    let structured = async {
        let rows = client.structured_query(game, &query).await?;
        let teams: Vec<_> =
            rows.iter().filter_map(|row| team_from_row(client, game, row)).collect();
        Ok::<_, ScrapeError>(teams)
    };
    let fallback = move || async move {
        let pages = category_pages(client, game, "Teams", limit).await?;
        let teams: Vec<_> = pages
            .into_iter()
            .map(|page| {
                let url = client.page_url(game, &page.title);
                TeamRecord::new(page_id(&page.title), page.title, game, url, RecordSource::Fallback)
            })
            .collect();
        Ok::<_, ScrapeError>(teams)
    };

    let mut teams = with_fallback("teams", game, structured, fallback).await;
    teams.iter_mut().for_each(classify_team);
    teams
}

fn team_from_row<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    row: &Row,
) -> Option<TeamRecord> {
    let page = field(row, "pagename")?;
    let name = field(row, "name").unwrap_or_else(|| page.clone());
    let url = client.page_url(game, &page);
    let mut team = TeamRecord::new(page_id(&page), name, game, url, RecordSource::Structured);
    team.status_text = field(row, "status");
    team.location = field(row, "location");
    team.region = field(row, "region");
    team.disbanded =
        field(row, "disbanddate").filter(|d| !d.starts_with("0000") && !d.starts_with("1970"));
    Some(team)
}

pub fn classify_team(team: &mut TeamRecord) {
    team.status = if team.disbanded.is_some() {
        EntityStatus::Disbanded
    } else {
        EntityStatus::classify(team.status_text.as_deref().unwrap_or(""))
    };
}

/// Team page parse with infobox and roster; `Ok(None)` when the page is missing
pub async fn fetch_team_detail<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    title: &str,
) -> Result<Option<TeamRecord>> {
    let Some(page) = client.parse_page(game, title).await? else {
        return Ok(None);
    };
    let fields = extract_team_fields(&page.wikitext);
    Ok(Some(team_from_fields(client, game, &page.title, fields)))
}

fn team_from_fields<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    title: &str,
    fields: TeamFields,
) -> TeamRecord {
    let name = fields.name.unwrap_or_else(|| title.to_string());
    let url = client.page_url(game, title);
    let mut team = TeamRecord::new(page_id(title), name, game, url, RecordSource::Markup);
    team.status_text = fields.status_text;
    team.location = fields.location;
    team.region = fields.region;
    team.disbanded = fields.disbanded;
    team.roster = fields.roster;
    if team.status_text.is_none() && team.disbanded.is_none() && !team.roster.is_empty() {
        team.status_text = Some("active".to_string());
    }
    classify_team(&mut team);
    team
}

// ============================================================================
// PLAYERS
// ============================================================================

const PLAYER_FIELDS: &[&str] = &[
    "_pageName=pagename",
    "id=id",
    "name=name",
    "nationality=nationality",
    "team=team",
    "role=role",
    "status=status",
];

pub async fn fetch_players<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    limit: usize,
) -> Vec<PlayerRecord> {
    let query =
        StructuredQuery::new("Players", PLAYER_FIELDS, limit).order_by("Players._pageName ASC");

    let structured = async {
        let rows = client.structured_query(game, &query).await?;
        let players: Vec<_> =
            rows.iter().filter_map(|row| player_from_row(client, game, row)).collect();
        Ok::<_, ScrapeError>(players)
    };
    let fallback = move || async move {
        let pages = category_pages(client, game, "Players", limit).await?;
        let players: Vec<_> = pages
            .into_iter()
            .map(|page| {
                let url = client.page_url(game, &page.title);
                let id = page_id(&page.title);
                PlayerRecord::new(id, page.title, game, url, RecordSource::Fallback)
            })
            .collect();
        Ok::<_, ScrapeError>(players)
    };

    let mut players = with_fallback("players", game, structured, fallback).await;
    players.iter_mut().for_each(classify_player);
    players
}

fn player_from_row<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    row: &Row,
) -> Option<PlayerRecord> {
    let page = field(row, "pagename")?;
    let handle = field(row, "id").unwrap_or_else(|| page.clone());
    let url = client.page_url(game, &page);
    let mut player = PlayerRecord::new(page_id(&page), handle, game, url, RecordSource::Structured);
    player.real_name = field(row, "name");
    player.nationality = field(row, "nationality");
    player.team = field(row, "team");
    player.role = field(row, "role");
    player.status_text = field(row, "status");
    Some(player)
}

pub fn classify_player(player: &mut PlayerRecord) {
    player.status = match EntityStatus::classify(player.status_text.as_deref().unwrap_or("")) {
        EntityStatus::Unknown if player.team.is_some() => EntityStatus::Active,
        status => status,
    };
}

/// Player page parse with infobox fields; `Ok(None)` when the page is missing
pub async fn fetch_player_detail<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    title: &str,
) -> Result<Option<PlayerRecord>> {
    let Some(page) = client.parse_page(game, title).await? else {
        return Ok(None);
    };
    let fields = extract_player_fields(&page.wikitext);
    Ok(Some(player_from_fields(client, game, &page.title, fields)))
}

fn player_from_fields<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    title: &str,
    fields: PlayerFields,
) -> PlayerRecord {
    let handle = fields.id.unwrap_or_else(|| title.to_string());
    let url = client.page_url(game, title);
    let mut player = PlayerRecord::new(page_id(title), handle, game, url, RecordSource::Markup);
    player.real_name = fields.real_name;
    player.nationality = fields.nationality;
    player.role = fields.role;
    player.team = fields.team;
    player.status_text = fields.status_text;
    classify_player(&mut player);
    player
}

/// Structured rows for the given player pages, batched with `spacing`
/// between batches. Failed batches are logged and skipped.
pub async fn fetch_players_by_page<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    pages: &[String],
    spacing: Duration,
) -> Vec<PlayerRecord> {
    let mut players = Vec::new();
    for (index, batch) in pages.chunks(PLAYER_BATCH).enumerate() {
        if index > 0 {
            tokio::time::sleep(spacing).await;
        }
        let names = batch
            .iter()
            .map(|p| format!("\"{}\"", p.replace('_', " ").replace('"', "")))
            .collect::<Vec<_>>()
            .join(",");
        let query = StructuredQuery::new("Players", PLAYER_FIELDS, batch.len())
            .filter(format!("Players._pageName IN ({})", names));

        match client.structured_query(game, &query).await {
            Ok(rows) => {
                players.extend(rows.iter().filter_map(|row| player_from_row(client, game, row)))
            }
            Err(e) => log_failure("players", game, "batch lookup", &e),
        }
    }
    players.iter_mut().for_each(classify_player);
    players
}

// ============================================================================
// TOURNAMENTS
// ============================================================================

pub async fn fetch_tournaments<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    limit: usize,
    today: NaiveDate,
) -> Vec<TournamentRecord> {
    let query = StructuredQuery::new(
        "Tournaments",
        &[
            "_pageName=pagename",
            "name=name",
            "startdate=startdate",
            "enddate=enddate",
            "prizepool=prizepool",
            "location=location",
            "organizers=organizer",
            "liquipediatier=tier",
        ],
        limit,
    )
    .order_by("Tournaments.startdate DESC");

    let structured = async {
        let rows = client.structured_query(game, &query).await?;
        let tournaments: Vec<_> =
            rows.iter().filter_map(|row| tournament_from_row(client, game, row)).collect();
        Ok::<_, ScrapeError>(tournaments)
    };
    let fallback = move || async move {
        let pages = category_pages(client, game, "Tournaments", limit).await?;
        let tournaments: Vec<_> = pages
            .into_iter()
            .map(|page| {
                let url = client.page_url(game, &page.title);
                let name = page.title.clone();
                TournamentRecord::new(name, &page.title, game, url, RecordSource::Fallback)
            })
            .collect();
        Ok::<_, ScrapeError>(tournaments)
    };

    let mut tournaments = with_fallback("tournaments", game, structured, fallback).await;
    for tournament in &mut tournaments {
        tournament.status = compute_status(&tournament.date_range, today);
    }
    tournaments
}

fn tournament_from_row<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    row: &Row,
) -> Option<TournamentRecord> {
    let page = field(row, "pagename")?;
    let display = field(row, "name").unwrap_or_else(|| page.clone());
    let url = client.page_url(game, &page);
    let mut tournament =
        TournamentRecord::new(page.clone(), &display, game, url, RecordSource::Structured);
    tournament.date_range = DateRange {
        start: field(row, "startdate").as_deref().and_then(parse_wiki_date),
        end: field(row, "enddate").as_deref().and_then(parse_wiki_date),
    };
    tournament.prize_pool = field(row, "prizepool").filter(|p| p != "0");
    tournament.location = field(row, "location");
    tournament.organizer = field(row, "organizer");
    tournament.tier = field(row, "tier");
    Some(tournament)
}

// ============================================================================
// MATCHES
// ============================================================================

pub async fn fetch_recent_matches<T: Transport>(
    client: &WikiClient<T>,
    game: &str,
    limit: usize,
) -> Vec<MatchRecord> {
    let query = StructuredQuery::new(
        "Matches",
        &[
            "_pageName=pagename",
            "match2id=matchid",
            "opponent1=opponent1",
            "opponent2=opponent2",
            "opponent1score=opponent1score",
            "opponent2score=opponent2score",
            "date=date",
            "winner=winner",
            "tournament=tournament",
            "finished=finished",
        ],
        limit,
    )
    .order_by("Matches.date DESC");

    let structured = async {
        let rows = client.structured_query(game, &query).await?;
        Ok::<_, ScrapeError>(rows.iter().filter_map(match_from_row).collect::<Vec<_>>())
    };
    let fallback = move || async move {
        let Some(page) = client.parse_page(game, MATCHES_PAGE).await? else {
            return Ok::<_, ScrapeError>(Vec::new());
        };
        let mut matches = extract_match_list(&page.wikitext);
        matches.truncate(limit.min(client.fallback_cap()));
        for record in &mut matches {
            record.source = RecordSource::Fallback;
        }
        Ok::<_, ScrapeError>(matches)
    };

    with_fallback("matches", game, structured, fallback).await
}

fn match_from_row(row: &Row) -> Option<MatchRecord> {
    let teams = [field(row, "opponent1")?, field(row, "opponent2")?];
    let scores = [field(row, "opponent1score"), field(row, "opponent2score")];
    let finished =
        field(row, "finished").is_some_and(|f| f == "1" || f.eq_ignore_ascii_case("true"));

    let mut record = MatchRecord::new(teams, scores);
    if finished {
        record.status = MatchStatus::Completed;
    }
    record.winner = match field(row, "winner").as_deref() {
        Some("1") => Some(record.teams[0].clone()),
        Some("2") => Some(record.teams[1].clone()),
        Some("0") | None => None,
        Some(other) => Some(other.to_string()),
    };
    record.date = field(row, "date");
    record.match_id = field(row, "matchid");
    record.tournament = field(row, "tournament").or_else(|| field(row, "pagename"));
    record.source = RecordSource::Structured;
    Some(record)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_team_classification_prefers_disband_date() {
        let mut team = TeamRecord::new(
            "X".into(),
            "X".into(),
            "counterstrike",
            String::new(),
            RecordSource::Structured,
        );
        team.status_text = Some("active".into());
        team.disbanded = Some("2023-05-01".into());
        classify_team(&mut team);
        assert_eq!(team.status, EntityStatus::Disbanded);

        team.disbanded = None;
        classify_team(&mut team);
        assert_eq!(team.status, EntityStatus::Active);
    }

    #[test]
    fn test_player_with_team_defaults_to_active() {
        let mut player = PlayerRecord::new(
            "Sico".into(),
            "Sico".into(),
            "counterstrike",
            String::new(),
            RecordSource::Fallback,
        );
        classify_player(&mut player);
        assert_eq!(player.status, EntityStatus::Unknown);

        player.team = Some("Vertex Esports Club".into());
        classify_player(&mut player);
        assert_eq!(player.status, EntityStatus::Active);

        player.status_text = Some("Retired".into());
        classify_player(&mut player);
        assert_eq!(player.status, EntityStatus::Retired);
    }

    #[test]
    fn test_match_row_status_and_winner() {
        let record = match_from_row(&row(&[
            ("opponent1", "Vertex Esports Club"),
            ("opponent2", "ORDER"),
            ("opponent1score", "2"),
            ("opponent2score", "1"),
            ("winner", "1"),
            ("tournament", "CCT Season 3 Oceania Series"),
        ]))
        .unwrap();
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!(record.winner.as_deref(), Some("Vertex Esports Club"));
        assert_eq!(record.source, RecordSource::Structured);

        let forfeit =
            match_from_row(&row(&[("opponent1", "A"), ("opponent2", "B"), ("finished", "1")]))
                .unwrap();
        assert_eq!(forfeit.status, MatchStatus::Completed);

        assert!(match_from_row(&row(&[("opponent1", "A")])).is_none());
    }
}
