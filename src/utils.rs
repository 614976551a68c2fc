use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

// ============================================================================
// TEXT NORMALIZATION
// ============================================================================

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<ref[^>/]*/>|<ref[^>]*>.*?</ref>").unwrap());
static PIPED_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[[^\]|]*\|([^\]]*)\]\]").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\[([^\]]*)\]\]").unwrap());
static EXTERNAL_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[https?://\S+\s+([^\]]*)\]").unwrap());
static BARE_EXTERNAL_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[https?://[^\]\s]*\]").unwrap());
static TEMPLATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{[^{}]*\}\}").unwrap());
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Reduces a wikitext value to display text: links to their labels,
/// templates, tags, comments and emphasis dropped.
pub fn clean_value(raw: &str) -> String {
    let text = COMMENT.replace_all(raw, "");
    let text = REF.replace_all(&text, "");
    let text = PIPED_LINK.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = EXTERNAL_LINK.replace_all(&text, "$1");
    let text = BARE_EXTERNAL_LINK.replace_all(&text, "");
    let mut text = text.into_owned();
    // nested templates collapse from the inside out
    while TEMPLATE.is_match(&text) {
        text = TEMPLATE.replace_all(&text, "").into_owned();
    }
    let text = HTML_TAG.replace_all(&text, " ");
    let text = text.replace("'''", "").replace("''", "").replace("&nbsp;", " ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Comparison key: lowercase with collapsed whitespace
pub fn normalize_key(value: &str) -> String {
    WHITESPACE.replace_all(value.trim(), " ").to_lowercase()
}

/// Appends `value` unless an equal entry (case/whitespace-insensitive) exists
pub fn push_unique(list: &mut Vec<String>, value: &str) -> bool {
    let value = WHITESPACE.replace_all(value.trim(), " ").into_owned();
    if value.is_empty() {
        return false;
    }
    let key = normalize_key(&value);
    if list.iter().any(|existing| normalize_key(existing) == key) {
        return false;
    }
    list.push(value);
    true
}

/// Names the wiki uses for slots that have no team yet
pub fn is_placeholder_name(name: &str) -> bool {
    matches!(
        normalize_key(name).as_str(),
        "" | "tbd" | "tba" | "bye" | "-" | "?" | "definitions" | "none"
    )
}

/// Page title as it appears in URLs and identifiers
pub fn page_id(title: &str) -> String {
    WHITESPACE.replace_all(title.trim(), "_").into_owned()
}

// ============================================================================
// DATES
// ============================================================================

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})[-/](\d{1,2}|\?\?)[-/](\d{1,2}|\?\?)").unwrap());
static MONTH_DAY_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})").unwrap());
static DAY_MONTH_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})(?:st|nd|rd|th)?\s+([A-Za-z]{3,9})\.?,?\s+(\d{4})").unwrap());

/// Parses the date formats the wiki uses. Unknown day or month (`2024-05-??`)
/// resolves to the first day of the known period.
pub fn parse_wiki_date(raw: &str) -> Option<NaiveDate> {
    let text = clean_value(raw);

    if let Some(caps) = ISO_DATE.captures(&text) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().unwrap_or(1);
        let day: u32 = caps[3].parse().unwrap_or(1);
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = MONTH_DAY_YEAR.captures(&text) {
        let month = month_number(&caps[1])?;
        return NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month, caps[2].parse().ok()?);
    }

    if let Some(caps) = DAY_MONTH_YEAR.captures(&text) {
        let month = month_number(&caps[2])?;
        return NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month, caps[1].parse().ok()?);
    }

    None
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] =
        ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    MONTHS.iter().position(|m| *m == prefix).map(|i| i as u32 + 1)
}

// ============================================================================
// SIMILARITY
// ============================================================================

/// Lowercase alphanumeric tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Dice coefficient over token sets, 0.0 to 1.0
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let a: HashSet<String> = tokenize(a).into_iter().collect();
    let b: HashSet<String> = tokenize(b).into_iter().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    2.0 * shared as f64 / (a.len() + b.len()) as f64
}

// ============================================================================
// TEMPLATE SCANNING
// ============================================================================

/// A `{{Name|positional|key=value}}` call split into its arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    pub name: String,
    pub positional: Vec<String>,
    /// Keys are lowercased, values kept raw
    pub named: Vec<(String, String)>,
}

impl Template {
    /// First non-empty value among `keys`
    pub fn get(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| {
            self.named
                .iter()
                .find(|(k, v)| k == key && !v.trim().is_empty())
                .map(|(_, v)| v.as_str())
        })
    }

    pub fn name_is(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.name.eq_ignore_ascii_case(n))
    }
}

/// Index one past the `}}` closing the template opened at `start`
pub fn find_block_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'}' && bytes[i + 1] == b'}' {
            depth = depth.saturating_sub(1);
            i += 2;
            if depth == 0 {
                return Some(i);
            }
        } else {
            i += 1;
        }
    }
    None
}

fn template_name(rest: &str) -> &str {
    rest.split(['|', '}', '\n']).next().unwrap_or("").trim()
}

/// Balanced `{{...}}` blocks whose template name passes `accept`, with their
/// byte offsets. Blocks nested inside an accepted block are not reported.
pub fn template_blocks<'a>(text: &'a str, accept: impl Fn(&str) -> bool) -> Vec<(usize, &'a str)> {
    let mut blocks = Vec::new();
    let mut from = 0;
    while let Some(offset) = text[from..].find("{{") {
        let start = from + offset;
        if accept(template_name(&text[start + 2..])) {
            if let Some(end) = find_block_end(text, start) {
                blocks.push((start, &text[start..end]));
                from = end;
                continue;
            }
        }
        from = start + 2;
    }
    blocks
}

/// Splits on `sep` outside nested `{{ }}` and `[[ ]]`
pub fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut last = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let next = chars.peek().map(|(_, n)| *n);
        match (c, next) {
            ('{', Some('{')) | ('[', Some('[')) => {
                depth += 1;
                chars.next();
            }
            ('}', Some('}')) | (']', Some(']')) => {
                depth -= 1;
                chars.next();
            }
            _ if c == sep && depth <= 0 => {
                parts.push(&text[last..i]);
                last = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[last..]);
    parts
}

fn split_key_value(part: &str) -> Option<(String, String)> {
    let pieces = split_top_level(part, '=');
    if pieces.len() < 2 {
        return None;
    }
    let key = pieces[0].trim().to_lowercase();
    let is_key = !key.is_empty()
        && key.len() <= 40
        && key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == ' ');
    if !is_key {
        return None;
    }
    let value = part[pieces[0].len() + 1..].trim().to_string();
    Some((key, value))
}

/// Parses a complete `{{...}}` block
pub fn parse_template(block: &str) -> Template {
    let inner = block.trim();
    let inner = inner.strip_prefix("{{").unwrap_or(inner);
    let inner = inner.strip_suffix("}}").unwrap_or(inner);

    let mut parts = split_top_level(inner, '|').into_iter();
    let mut template = Template {
        name: parts.next().unwrap_or("").trim().to_string(),
        ..Template::default()
    };
    for part in parts {
        match split_key_value(part) {
            Some(pair) => template.named.push(pair),
            None => template.positional.push(part.trim().to_string()),
        }
    }
    template
}

/// Every `key=value` pair on every line, in document order
pub fn labeled_pairs(markup: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in markup.lines() {
        let mut line = line.trim();
        if let Some(rest) = line.strip_prefix("{{") {
            line = rest;
        }
        if line.matches("}}").count() > line.matches("{{").count() {
            if let Some(rest) = line.strip_suffix("}}") {
                line = rest;
            }
        }
        for segment in split_top_level(line, '|') {
            if let Some(pair) = split_key_value(segment) {
                pairs.push(pair);
            }
        }
    }
    pairs
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_value_strips_markup() {
        assert_eq!(clean_value("[[ESL|ESL Gaming]]"), "ESL Gaming");
        assert_eq!(clean_value("[[Valve]]<ref>source</ref>"), "Valve");
        assert_eq!(clean_value("'''$250,000''' {{Abbr/USD}}"), "$250,000");
        assert_eq!(clean_value("[https://example.com Example]"), "Example");
        assert_eq!(clean_value("Berlin<!-- venue tbc -->"), "Berlin");
    }

    #[test]
    fn test_push_unique_ignores_case_and_spacing() {
        let mut list = vec!["Team Liquid".to_string()];
        assert!(!push_unique(&mut list, "  team   liquid "));
        assert!(push_unique(&mut list, "Natus Vincere"));
        assert!(!push_unique(&mut list, ""));
        assert_eq!(list, vec!["Team Liquid", "Natus Vincere"]);
    }

    #[test]
    fn test_parse_wiki_dates() {
        let jan_5 = NaiveDate::from_ymd_opt(2024, 1, 5);
        assert_eq!(parse_wiki_date("2024-01-05"), jan_5);
        assert_eq!(parse_wiki_date("2024-01-05 - 18:00 {{Abbr/CET}}"), jan_5);
        assert_eq!(parse_wiki_date("January 5, 2024"), jan_5);
        assert_eq!(parse_wiki_date("5 Jan 2024"), jan_5);
        assert_eq!(parse_wiki_date("2024-03-??"), NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(parse_wiki_date("TBA"), None);
    }

    #[test]
    fn test_token_overlap() {
        assert_eq!(token_overlap("IEM Katowice 2024", "IEM Katowice 2024"), 1.0);
        let overlap = token_overlap("CCT Season 3 Oceania Series 2", "CCT Season 3 Oceania Series");
        assert!(overlap > 0.9);
        assert_eq!(token_overlap("BLAST Premier", "ESL Pro League"), 0.0);
    }

    #[test]
    fn test_parse_template_with_nested_arguments() {
        let template =
            parse_template("{{TeamCard|team=[[Team Liquid|Liquid]]|p1={{Flag|us}} EliGE|Extra}}");
        assert_eq!(template.name, "TeamCard");
        assert_eq!(template.get(&["team"]), Some("[[Team Liquid|Liquid]]"));
        assert_eq!(template.get(&["p1"]), Some("{{Flag|us}} EliGE"));
        assert_eq!(template.positional, vec!["Extra"]);
    }

    #[test]
    fn test_template_blocks_skip_nested_matches() {
        let text = "a {{Bracket|R1M1={{Match|opponent1={{TeamOpponent|A}}}}}} b {{Match|x=1}}";
        let brackets = template_blocks(text, |name| name.eq_ignore_ascii_case("bracket"));
        assert_eq!(brackets.len(), 1);
        assert!(brackets[0].1.ends_with("}}}}"));

        let matches = template_blocks(text, |name| name.eq_ignore_ascii_case("match"));
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_labeled_pairs_handles_single_line_templates() {
        let pairs =
            labeled_pairs("{{Infobox league|name=Test Cup|sdate=2024-01-01}}\n|edate=2024-01-10\n");
        assert_eq!(
            pairs,
            vec![
                ("name".to_string(), "Test Cup".to_string()),
                ("sdate".to_string(), "2024-01-01".to_string()),
                ("edate".to_string(), "2024-01-10".to_string()),
            ]
        );
    }
}
