use regex::Regex;
use std::sync::LazyLock;

use crate::markup::team_name;
use crate::models::{BracketEntry, MatchRecord, MatchStatus, Placement, RecordSource};
use crate::utils::{clean_value, is_placeholder_name, parse_template, template_blocks, Template};

// ============================================================================
// KNOWN TEMPLATES
// ============================================================================

const MATCH_TEMPLATES: &[&str] = &["Match", "MatchMaps", "Match2", "BracketMatch"];
const PLACEMENT_TEMPLATES: &[&str] = &["Slot", "Prize pool slot", "PrizePoolSlot"];

static MATCH_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^r(\d+)m(\d+)$").unwrap());

fn is_bracket(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("bracket") && name != "bracketmatch"
}

fn is_match(name: &str) -> bool {
    MATCH_TEMPLATES.iter().any(|t| name.eq_ignore_ascii_case(t))
}

// ============================================================================
// SINGLE MATCH PARSING
// ============================================================================

/// Both sides of one match template, whatever could be read
#[derive(Debug, Default)]
struct MatchSlot {
    teams: [Option<String>; 2],
    scores: [Option<String>; 2],
    winner: Option<String>,
    date: Option<String>,
}

impl MatchSlot {
    fn both_teams(&self) -> Option<[String; 2]> {
        match &self.teams {
            [Some(a), Some(b)] => Some([a.clone(), b.clone()]),
            _ => None,
        }
    }

    fn scoreline(&self) -> Option<String> {
        match &self.scores {
            [Some(a), Some(b)] => Some(format!("{}-{}", a, b)),
            _ => None,
        }
    }

    fn into_match(self, match_id: Option<String>) -> Option<MatchRecord> {
        let teams = self.both_teams()?;
        let mut record = MatchRecord::new(teams, self.scores);
        record.date = self.date;
        record.winner = self.winner;
        record.match_id = match_id;
        record.source = RecordSource::Markup;
        Some(record)
    }
}

fn clean_score(raw: &str) -> Option<String> {
    let score = clean_value(raw);
    if score.is_empty() || score == "-" {
        None
    } else {
        Some(score)
    }
}

/// `opponentN` value: an opponent template or plain team text
fn parse_opponent(raw: &str) -> (Option<String>, Option<String>) {
    let raw = raw.trim();
    if raw.starts_with("{{") {
        let template = parse_template(raw);
        let score = template.get(&["score"]).and_then(clean_score);
        (team_name(&template), score)
    } else {
        let name = clean_value(raw);
        if is_placeholder_name(&name) {
            (None, None)
        } else {
            (Some(name), None)
        }
    }
}

fn parse_match(template: &Template) -> MatchSlot {
    let mut slot = MatchSlot::default();

    for side in 0..2 {
        let n = side + 1;
        if let Some(raw) = template.get(&[&format!("opponent{}", n)]) {
            let (team, score) = parse_opponent(raw);
            slot.teams[side] = team;
            slot.scores[side] = score;
        }
        if slot.teams[side].is_none() {
            slot.teams[side] = template
                .get(&[&format!("team{}", n)])
                .map(clean_value)
                .filter(|name| !is_placeholder_name(name));
        }
        if slot.scores[side].is_none() {
            let keys = [
                format!("score{}", n),
                format!("games{}", n),
                format!("opponent{}score", n),
            ];
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            slot.scores[side] = template.get(&keys).and_then(clean_score);
        }
    }

    slot.winner = resolve_winner(template.get(&["winner", "win"]), &slot.teams);
    slot.date = template.get(&["date"]).map(clean_value).filter(|d| !d.is_empty());
    slot
}

/// A winner field holds either the slot number or the team name
fn resolve_winner(raw: Option<&str>, teams: &[Option<String>; 2]) -> Option<String> {
    let winner = clean_value(raw?);
    match winner.as_str() {
        "" | "0" | "draw" | "skip" => None,
        "1" => teams[0].clone().or(Some(winner)),
        "2" => teams[1].clone().or(Some(winner)),
        _ => Some(winner),
    }
}

// ============================================================================
// BRACKET-BLOCK PASS
// ============================================================================

/// Entries of every bracket block, in markup order. Keyed matches (`R1M1=`)
/// take their round from the key; older brackets without match keys pair
/// their score, team and winner fields by position.
pub fn extract_bracket_entries(markup: &str) -> Vec<BracketEntry> {
    template_blocks(markup, is_bracket)
        .into_iter()
        .flat_map(|(_, block)| bracket_slots(&parse_template(block)))
        .map(|(round, match_id, slot)| entry_from_slot(round, match_id, slot))
        .collect()
}

/// Round, match id and slot for every match of one bracket block
fn bracket_slots(template: &Template) -> Vec<(u32, String, MatchSlot)> {
    let keyed = keyed_slots(template);
    if keyed.is_empty() {
        positional_slots(template)
    } else {
        keyed
    }
}

fn keyed_slots(template: &Template) -> Vec<(u32, String, MatchSlot)> {
    let mut slots = Vec::new();
    for (key, value) in &template.named {
        let Some(caps) = MATCH_KEY.captures(key) else {
            continue;
        };
        let round: u32 = caps[1].parse().unwrap_or(1);
        let match_id = format!("R{}M{}", &caps[1], &caps[2]);

        let slot = if value.trim_start().starts_with("{{") {
            parse_match(&parse_template(value))
        } else {
            MatchSlot::default()
        };
        if slot.teams.iter().all(Option::is_none) && slot.winner.is_none() {
            continue;
        }
        slots.push((round, match_id, slot));
    }
    slots
}

fn entry_from_slot(round: u32, match_id: String, slot: MatchSlot) -> BracketEntry {
    let score = slot.scoreline();
    let status = if score.is_some() || slot.winner.is_some() {
        MatchStatus::Completed
    } else {
        MatchStatus::Scheduled
    };
    BracketEntry {
        round,
        match_id,
        teams: slot.teams,
        score,
        winner: slot.winner,
        status,
    }
}

fn values_ending_with<'a>(template: &'a Template, suffix: &str) -> Vec<&'a str> {
    template
        .named
        .iter()
        .filter(|(k, _)| k.ends_with(suffix))
        .map(|(_, v)| v.as_str())
        .collect()
}

fn nth<'a>(list: &[&'a str], at: usize) -> Option<&'a str> {
    list.get(at).copied()
}

fn positional_slots(template: &Template) -> Vec<(u32, String, MatchSlot)> {
    let scores = values_ending_with(template, "score");
    let teams = values_ending_with(template, "team");
    let winners = values_ending_with(template, "winner");

    let pairs = scores.len().div_ceil(2).max(teams.len().div_ceil(2)).max(winners.len());
    let mut slots = Vec::with_capacity(pairs);

    for index in 0..pairs {
        let team_at = |at: usize| {
            nth(&teams, at)
                .map(clean_value)
                .filter(|t| !is_placeholder_name(t))
        };
        let slot_teams = [team_at(2 * index), team_at(2 * index + 1)];
        let slot = MatchSlot {
            scores: [
                nth(&scores, 2 * index).and_then(clean_score),
                nth(&scores, 2 * index + 1).and_then(clean_score),
            ],
            winner: resolve_winner(nth(&winners, index), &slot_teams),
            teams: slot_teams,
            date: None,
        };
        if slot.scores.iter().all(Option::is_none) && slot.winner.is_none() {
            continue;
        }

        let (round, position) = round_for_pair(index, pairs);
        slots.push((round, format!("R{}M{}", round, position), slot));
    }
    slots
}

/// Round and 1-based position within the round for the `index`-th match of a
/// single-elimination bracket of `total` matches listed round by round.
pub fn round_for_pair(index: usize, total: usize) -> (u32, usize) {
    let mut round = 1;
    let mut offset = 0;
    let mut size = total.div_ceil(2).max(1);
    loop {
        if index < offset + size {
            return (round, index - offset + 1);
        }
        offset += size;
        round += 1;
        size = (size / 2).max(1);
    }
}

// ============================================================================
// MATCH-LIST PASS
// ============================================================================

/// Two-team match templates outside of bracket blocks. Completed only when
/// both scores are present.
pub fn extract_match_list(markup: &str) -> Vec<MatchRecord> {
    let mut outside_brackets = markup.to_string();
    for (start, block) in template_blocks(markup, is_bracket) {
        outside_brackets.replace_range(start..start + block.len(), &" ".repeat(block.len()));
    }

    template_blocks(&outside_brackets, is_match)
        .into_iter()
        .filter_map(|(_, block)| parse_match(&parse_template(block)).into_match(None))
        .collect()
}

/// Matches from both passes, bracket first, appended in markup order. A
/// match listed in a bracket and again in a match list appears twice.
/// Bracket slots become matches only once both teams are known.
pub fn extract_matches(markup: &str) -> Vec<MatchRecord> {
    let mut matches: Vec<MatchRecord> = template_blocks(markup, is_bracket)
        .into_iter()
        .flat_map(|(_, block)| bracket_slots(&parse_template(block)))
        .filter_map(|(_, match_id, slot)| slot.into_match(Some(match_id)))
        .collect();

    matches.extend(extract_match_list(markup));
    matches
}

pub fn has_bracket(markup: &str) -> bool {
    !template_blocks(markup, is_bracket).is_empty()
}

// ============================================================================
// RESULTS
// ============================================================================

/// Final standings from prize pool slots, one entry per team (ties share a place)
pub fn extract_placements(markup: &str) -> Vec<Placement> {
    let is_slot = |name: &str| PLACEMENT_TEMPLATES.iter().any(|t| name.eq_ignore_ascii_case(t));
    let mut placements = Vec::new();

    for (_, block) in template_blocks(markup, is_slot) {
        let template = parse_template(block);
        let Some(place) = template.get(&["place"]).map(clean_value).filter(|p| !p.is_empty()) else {
            continue;
        };
        let prize = template
            .get(&["usdprize", "prize", "localprize"])
            .map(clean_value)
            .filter(|p| !p.is_empty() && p != "0");

        let named_teams = template
            .named
            .iter()
            .filter(|(k, _)| k == "team" || k.starts_with("opponent"))
            .map(|(_, v)| v.as_str());
        for raw in template.positional.iter().map(String::as_str).chain(named_teams) {
            let team = if raw.trim_start().starts_with("{{") {
                team_name(&parse_template(raw))
            } else {
                Some(clean_value(raw)).filter(|t| !is_placeholder_name(t))
            };
            if let Some(team) = team {
                placements.push(Placement {
                    place: place.clone(),
                    team,
                    prize: prize.clone(),
                });
            }
        }
    }
    placements
}

// ============================================================================
// TESTS
// ============================================================================
