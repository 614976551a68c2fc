use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

use crate::models::RosterEntry;
use crate::utils::{
    clean_value, is_placeholder_name, labeled_pairs, parse_template, parse_wiki_date, push_unique,
    template_blocks, Template,
};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Everything the rules could pull from a tournament page. Each field is
/// extracted independently; an absent label leaves only that field empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TournamentFields {
    pub name: Option<String>,
    pub prize_pool: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub organizer: Option<String>,
    pub tier: Option<String>,
    pub team_count: Option<u32>,
    pub sponsors: Vec<String>,
    pub participants: Vec<String>,
    /// Scorelines recovered from rendered HTML only
    pub scores: Vec<String>,
    /// Names of fields no rule matched
    pub missing: Vec<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamFields {
    pub name: Option<String>,
    pub location: Option<String>,
    pub region: Option<String>,
    pub status_text: Option<String>,
    pub created: Option<String>,
    pub disbanded: Option<String>,
    pub roster: Vec<RosterEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerFields {
    pub id: Option<String>,
    pub real_name: Option<String>,
    pub nationality: Option<String>,
    pub role: Option<String>,
    pub team: Option<String>,
    pub status_text: Option<String>,
}

// ============================================================================
// FIELD LABELS
// ============================================================================

const NAME_KEYS: &[&str] = &["name", "tournament_name"];
const PRIZE_POOL_KEYS: &[&str] = &["prizepool", "prizepoolusd", "prize_pool", "prize pool"];
const START_DATE_KEYS: &[&str] = &["sdate", "startdate", "start_date", "date"];
const END_DATE_KEYS: &[&str] = &["edate", "enddate", "end_date", "date"];
const VENUE_KEYS: &[&str] = &["location", "venue"];
const CITY_KEYS: &[&str] = &["city", "location1"];
const COUNTRY_KEYS: &[&str] = &["country", "country1"];
const ORGANIZER_KEYS: &[&str] = &["organizer", "organizer1", "organiser"];
const TIER_KEYS: &[&str] = &["liquipediatier", "tier"];
const TEAM_COUNT_KEYS: &[&str] = &["team_number", "participants_number", "teams"];

/// Templates whose first argument names a participating team
const TEAM_TEMPLATES: &[&str] = &[
    "TeamCard", "TeamCard2", "Team", "TeamShort", "TeamIcon", "TeamOpponent", "Opponent",
];
const SQUAD_TEMPLATES: &[&str] = &["SquadPlayer", "Squad player", "Squad/Player", "Player"];

static LIST_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>|,|;|•").unwrap());
static TEAM_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^team\d*$").unwrap());
static SPONSOR_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^sponsors?\d*$").unwrap());
static SECTION_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(={2,})\s*(.*?)\s*={2,}\s*$").unwrap());
static LIST_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]|]+)(?:\|[^\]]*)?\]\]").unwrap());
static SCORELINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,3})\s*[-:–]\s*(\d{1,3})\s*$").unwrap());
static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

// ============================================================================
// TOURNAMENT PAGES
// ============================================================================

/// Extracts the tournament infobox fields, sponsors and participants from wikitext.
pub fn extract_tournament_fields(markup: &str) -> TournamentFields {
    let scope = infobox(markup).unwrap_or(markup);
    let pairs = labeled_pairs(scope);

    let mut fields = TournamentFields {
        name: first_value(&pairs, NAME_KEYS),
        prize_pool: first_value(&pairs, PRIZE_POOL_KEYS),
        start_date: first_date(&pairs, START_DATE_KEYS),
        end_date: first_date(&pairs, END_DATE_KEYS),
        location: location(&pairs),
        organizer: first_value(&pairs, ORGANIZER_KEYS),
        tier: first_value(&pairs, TIER_KEYS),
        team_count: first_value(&pairs, TEAM_COUNT_KEYS)
            .and_then(|v| DIGITS.find(&v).and_then(|m| m.as_str().parse().ok())),
        sponsors: sponsors(&pairs),
        participants: participants(markup),
        ..TournamentFields::default()
    };

    fields.missing = missing_fields(&fields);
    for field in &fields.missing {
        log::debug!("No rule matched tournament field '{}'", field);
    }
    fields
}

fn infobox(markup: &str) -> Option<&str> {
    template_blocks(markup, |name| name.to_lowercase().starts_with("infobox"))
        .first()
        .map(|(_, block)| *block)
}

fn first_value(pairs: &[(String, String)], keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| clean_value(v))
            .find(|v| !v.is_empty())
    })
}

fn first_date(pairs: &[(String, String)], keys: &[&str]) -> Option<NaiveDate> {
    keys.iter().find_map(|key| {
        pairs
            .iter()
            .filter(|(k, _)| k == key)
            .find_map(|(_, v)| parse_wiki_date(v))
    })
}

/// Venue when labeled, otherwise "city, country" from whichever is present
fn location(pairs: &[(String, String)]) -> Option<String> {
    if let Some(venue) = first_value(pairs, VENUE_KEYS) {
        return Some(venue);
    }
    let parts: Vec<String> = [first_value(pairs, CITY_KEYS), first_value(pairs, COUNTRY_KEYS)]
        .into_iter()
        .flatten()
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn sponsors(pairs: &[(String, String)]) -> Vec<String> {
    let mut sponsors = Vec::new();
    for (_, value) in pairs.iter().filter(|(k, _)| SPONSOR_KEY.is_match(k)) {
        for piece in LIST_SEPARATOR.split(value) {
            push_unique(&mut sponsors, &clean_value(piece));
        }
    }
    sponsors
}

pub(crate) fn team_name(template: &Template) -> Option<String> {
    let raw = template
        .get(&["team", "template", "name"])
        .or_else(|| template.positional.iter().map(String::as_str).find(|p| !p.trim().is_empty()))?;
    let name = clean_value(raw);
    if is_placeholder_name(&name) {
        None
    } else {
        Some(name)
    }
}

/// Team names from team templates, `teamN=` labels and linked list items
/// under a Participants heading, in encounter order
fn participants(markup: &str) -> Vec<String> {
    let mut participants = Vec::new();

    let is_team_template = |name: &str| TEAM_TEMPLATES.iter().any(|t| name.eq_ignore_ascii_case(t));
    for (_, block) in template_blocks(markup, is_team_template) {
        if let Some(name) = team_name(&parse_template(block)) {
            push_unique(&mut participants, &name);
        }
    }

    for (_, value) in labeled_pairs(markup).iter().filter(|(k, _)| TEAM_KEY.is_match(k)) {
        let name = clean_value(value);
        if !is_placeholder_name(&name) {
            push_unique(&mut participants, &name);
        }
    }

    for name in participant_section_links(markup) {
        push_unique(&mut participants, &name);
    }

    participants
}

fn participant_section_links(markup: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut in_section: Option<usize> = None;

    for line in markup.lines() {
        let line = line.trim();
        if let Some(caps) = SECTION_HEADING.captures(line) {
            let level = caps[1].len();
            if caps[2].to_lowercase().contains("participant") {
                in_section = Some(level);
            } else if in_section.is_some_and(|open| level <= open) {
                in_section = None;
            }
            continue;
        }
        if in_section.is_some() && (line.starts_with('*') || line.starts_with('#')) {
            for caps in LIST_LINK.captures_iter(line) {
                let name = caps[1].trim();
                if !name.contains(':') && !is_placeholder_name(name) {
                    names.push(name.to_string());
                }
            }
        }
    }
    names
}

fn missing_fields(fields: &TournamentFields) -> Vec<&'static str> {
    let checks: [(&'static str, bool); 10] = [
        ("name", fields.name.is_none()),
        ("prize_pool", fields.prize_pool.is_none()),
        ("start_date", fields.start_date.is_none()),
        ("end_date", fields.end_date.is_none()),
        ("location", fields.location.is_none()),
        ("organizer", fields.organizer.is_none()),
        ("tier", fields.tier.is_none()),
        ("team_count", fields.team_count.is_none()),
        ("sponsors", fields.sponsors.is_empty()),
        ("participants", fields.participants.is_empty()),
    ];
    checks.into_iter().filter(|(_, missing)| *missing).map(|(name, _)| name).collect()
}

// ============================================================================
// HTML AUGMENTATION
// ============================================================================

const PARTICIPANT_SELECTORS: &[&str] = &[
    ".teamcard center a",
    ".teamcard-inner .teamcard-title a",
    ".team-template-text a",
    "td[data-label=\"Team\"]",
    "th.participant-name",
];
const SCORE_SELECTOR: &str = "[class*=\"score\"]";

/// Adds participants and scorelines found only in the rendered page. Values are
/// appended and deduplicated; wikitext values are never replaced.
pub fn augment_from_html(fields: &mut TournamentFields, html: &str) {
    let document = Html::parse_fragment(html);
    let before = fields.participants.len();

    for selector in PARTICIPANT_SELECTORS {
        let selector = Selector::parse(selector).unwrap();
        for element in document.select(&selector) {
            let text = element.text().collect::<String>();
            let name = text.trim();
            if !is_placeholder_name(name) {
                push_unique(&mut fields.participants, name);
            }
        }
    }

    let score_selector = Selector::parse(SCORE_SELECTOR).unwrap();
    for element in document.select(&score_selector) {
        let text = element.text().collect::<String>();
        if let Some(caps) = SCORELINE.captures(&text) {
            push_unique(&mut fields.scores, &format!("{}-{}", &caps[1], &caps[2]));
        }
    }

    if fields.participants.len() > before {
        fields.missing.retain(|field| *field != "participants");
        log::debug!("HTML added {} participants", fields.participants.len() - before);
    }
}

// ============================================================================
// TEAM & PLAYER PAGES
// ============================================================================

/// Infobox fields and the current roster of a team page
pub fn extract_team_fields(markup: &str) -> TeamFields {
    let pairs = labeled_pairs(infobox(markup).unwrap_or(markup));

    TeamFields {
        name: first_value(&pairs, &["name"]),
        location: first_value(&pairs, &["location", "country"]),
        region: first_value(&pairs, &["region"]),
        status_text: first_value(&pairs, &["status"]),
        created: first_value(&pairs, &["created"]),
        disbanded: first_value(&pairs, &["disbanded"]),
        roster: roster(markup),
    }
}

/// Players in squad templates that have not left the team
fn roster(markup: &str) -> Vec<RosterEntry> {
    let mut roster: Vec<RosterEntry> = Vec::new();
    let is_squad = |name: &str| SQUAD_TEMPLATES.iter().any(|t| name.eq_ignore_ascii_case(t));

    for (_, block) in template_blocks(markup, is_squad) {
        let template = parse_template(block);
        if template.get(&["leavedate", "left"]).is_some() {
            continue;
        }
        let Some(id) = template
            .get(&["id", "player"])
            .or_else(|| template.positional.first().map(String::as_str))
            .map(clean_value)
            .filter(|id| !id.is_empty())
        else {
            continue;
        };
        if roster.iter().any(|entry| entry.id.eq_ignore_ascii_case(&id)) {
            continue;
        }
        roster.push(RosterEntry {
            id,
            name: template.get(&["name"]).map(clean_value).filter(|v| !v.is_empty()),
            nationality: template
                .get(&["flag", "country", "nationality"])
                .map(clean_value)
                .filter(|v| !v.is_empty()),
            role: template.get(&["role", "position"]).map(clean_value).filter(|v| !v.is_empty()),
        });
    }
    roster
}

/// Infobox fields of a player page
pub fn extract_player_fields(markup: &str) -> PlayerFields {
    let pairs = labeled_pairs(infobox(markup).unwrap_or(markup));

    PlayerFields {
        id: first_value(&pairs, &["id", "ids"]),
        real_name: first_value(&pairs, &["name", "romanized_name"]),
        nationality: first_value(&pairs, &["country", "nationality", "country1"]),
        role: first_value(&pairs, &["role", "position"]),
        team: first_value(&pairs, &["team", "team1"]),
        status_text: first_value(&pairs, &["status"]),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TOURNAMENT: &str = r#"
{{Infobox league
|name=CCT Season 3 Oceania Series
|organizer=[[Grid Esports Ecosystem|GRID]]
|sponsor=[[Intel]]<br>[[Monster Energy|Monster]]
|city=Sydney
|country=Australia
|prizepool=$10,000
|sdate=2024-01-01
|edate=2024-01-10
|liquipediatier=3
|team_number=8
}}
==Participants==
{{TeamCard|team=Vertex Esports Club|p1=Sico}}
{{TeamCard|team=[[ORDER]]|p1=Vexite}}
{{TeamCard|team=TBD}}
"#;

    #[test]
    fn test_extracts_every_labeled_field() {
        let fields = extract_tournament_fields(TOURNAMENT);
        assert_eq!(fields.name.as_deref(), Some("CCT Season 3 Oceania Series"));
        assert_eq!(fields.organizer.as_deref(), Some("GRID"));
        assert_eq!(fields.sponsors, vec!["Intel", "Monster"]);
        assert_eq!(fields.location.as_deref(), Some("Sydney, Australia"));
        assert_eq!(fields.prize_pool.as_deref(), Some("$10,000"));
        assert_eq!(fields.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(fields.end_date, NaiveDate::from_ymd_opt(2024, 1, 10));
        assert_eq!(fields.tier.as_deref(), Some("3"));
        assert_eq!(fields.team_count, Some(8));
        assert_eq!(fields.participants, vec!["Vertex Esports Club", "ORDER"]);
        assert!(fields.missing.is_empty());
    }

    #[test]
    fn test_missing_label_only_empties_that_field() {
        let without_prize = TOURNAMENT.replace("|prizepool=$10,000\n", "");
        let without_dates = TOURNAMENT
            .replace("|sdate=2024-01-01\n", "")
            .replace("|edate=2024-01-10\n", "");

        let fields = extract_tournament_fields(&without_prize);
        assert_eq!(fields.prize_pool, None);
        assert_eq!(fields.missing, vec!["prize_pool"]);
        assert_eq!(fields.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(fields.organizer.as_deref(), Some("GRID"));
        assert_eq!(fields.participants.len(), 2);

        let fields = extract_tournament_fields(&without_dates);
        assert_eq!(fields.start_date, None);
        assert_eq!(fields.end_date, None);
        assert_eq!(fields.prize_pool.as_deref(), Some("$10,000"));
        assert_eq!(fields.team_count, Some(8));
    }

    #[test]
    fn test_single_date_sets_both_ends() {
        let fields =
            extract_tournament_fields("{{Infobox league\n|name=Showmatch\n|date=2024-06-15\n}}");
        assert_eq!(fields.start_date, NaiveDate::from_ymd_opt(2024, 6, 15));
        assert_eq!(fields.end_date, fields.start_date);
    }

    #[test]
    fn test_participants_from_participant_section_links() {
        let markup = "==Participants==\n* [[Team Liquid]]\n* [[FaZe Clan|FaZe]]\n* [[Category:Teams]]\n==Results==\n* [[Not A Team]]\n";
        let fields = extract_tournament_fields(markup);
        assert_eq!(fields.participants, vec!["Team Liquid", "FaZe Clan"]);
    }

    #[test]
    fn test_html_adds_participants_without_duplicates() {
        let mut fields = extract_tournament_fields(TOURNAMENT);
        let html = r#"
            <div class="teamcard"><center><a href="/x">vertex  esports club</a></center></div>
            <div class="teamcard"><center><a href="/y">Rooster</a></center></div>
            <span class="team-template-text"><a href="/z">ORDER</a></span>
            <div class="brkts-score">2-1</div>
            <span class="match-score">2 : 1</span>
            <span class="score">16-14</span>
        "#;
        augment_from_html(&mut fields, html);

        assert_eq!(fields.participants, vec!["Vertex Esports Club", "ORDER", "Rooster"]);
        assert_eq!(fields.scores, vec!["2-1", "16-14"]);
    }

    #[test]
    fn test_html_fills_participants_when_wikitext_has_none() {
        let mut fields = extract_tournament_fields("{{Infobox league|name=Cup}}");
        assert!(fields.missing.contains(&"participants"));

        augment_from_html(
            &mut fields,
            r#"<table><tr><td data-label="Team">Grayhound Gaming</td><td>1st</td></tr></table>"#,
        );
        assert_eq!(fields.participants, vec!["Grayhound Gaming"]);
        assert!(!fields.missing.contains(&"participants"));
    }

    #[test]
    fn test_team_page_roster_skips_departed_players() {
        let markup = r#"
{{Infobox team
|name=Vertex Esports Club
|location=Australia
|region=Oceania
|status=Active
}}
{{ActiveSquad|
{{SquadPlayer|id=Sico|flag=au|name=Aaron Ward|role=Rifler}}
{{SquadPlayer|id=BL1TZ|flag=au|name=Blitz|joindate=2023-01-01}}
{{SquadPlayer|id=Malta|flag=au|leavedate=2022-12-01}}
}}
"#;
        let fields = extract_team_fields(markup);
        assert_eq!(fields.name.as_deref(), Some("Vertex Esports Club"));
        assert_eq!(fields.region.as_deref(), Some("Oceania"));
        assert_eq!(fields.status_text.as_deref(), Some("Active"));
        assert_eq!(fields.roster.len(), 2);
        assert_eq!(fields.roster[0].id, "Sico");
        assert_eq!(fields.roster[0].nationality.as_deref(), Some("au"));
        assert_eq!(fields.roster[0].role.as_deref(), Some("Rifler"));
        assert_eq!(fields.roster[1].role, None);
    }

    #[test]
    fn test_player_page_fields() {
        let markup = "{{Infobox player\n|id=s1mple\n|name=Oleksandr Kostyliev\n|country=Ukraine\n|role=[[AWPer]]\n|team=[[Natus Vincere]]\n|status=Active\n}}";
        let fields = extract_player_fields(markup);
        assert_eq!(fields.id.as_deref(), Some("s1mple"));
        assert_eq!(fields.real_name.as_deref(), Some("Oleksandr Kostyliev"));
        assert_eq!(fields.nationality.as_deref(), Some("Ukraine"));
        assert_eq!(fields.role.as_deref(), Some("AWPer"));
        assert_eq!(fields.team.as_deref(), Some("Natus Vincere"));
    }
}
