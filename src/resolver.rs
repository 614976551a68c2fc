use regex::Regex;
use std::sync::LazyLock;

use crate::api::{ParsedPage, WikiClient};
use crate::error::{Result, ScrapeError};
use crate::governor::Transport;
use crate::utils::{normalize_key, token_overlap};

/// Search hits considered when no variant resolves directly
const SEARCH_LIMIT: usize = 10;

static TRAILING_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+#?\d+$").unwrap());
static TRAILING_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+(season|series|split|stage|phase|part|edition|week|day)(\s+#?\d+)?$").unwrap()
});
static SEARCH_MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

// ============================================================================
// NAME VARIANTS
// ============================================================================

/// Candidate page names for a user-typed tournament name, most specific first:
/// the name itself, then with a trailing number, a trailing season/series
/// token and the last one or two words removed.
pub fn name_variants(raw: &str) -> Vec<String> {
    let raw = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut variants: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        let key = normalize_key(candidate);
        if !candidate.is_empty() && !variants.iter().any(|v| normalize_key(v) == key) {
            variants.push(candidate.to_string());
        }
    };

    push(&raw);
    push(&TRAILING_NUMBER.replace(&raw, ""));
    push(&TRAILING_SUFFIX.replace(&raw, ""));

    let words: Vec<&str> = raw.split(' ').collect();
    if words.len() > 1 {
        push(&words[..words.len() - 1].join(" "));
    }
    if words.len() > 2 {
        push(&words[..words.len() - 2].join(" "));
    }
    variants
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Finds the page for `raw_name`: every variant by direct lookup, then
/// full-text search with a similarity bar. `Ok(None)` is "not found"; an
/// error is returned only when every attempt failed in transport.
pub async fn resolve_page<T: Transport>(
    client: &WikiClient<T>,
    raw_name: &str,
    game: &str,
    min_similarity: f64,
) -> Result<Option<ParsedPage>> {
    let mut last_error: Option<ScrapeError> = None;
    let mut any_answered = false;

    for variant in name_variants(raw_name) {
        match client.parse_page(game, &variant).await {
            Ok(Some(page)) => {
                log::info!("Resolved '{}' to '{}' via variant '{}'", raw_name, page.title, variant);
                return Ok(Some(page));
            }
            Ok(None) => {
                any_answered = true;
                log::debug!("No page named '{}'", variant);
            }
            Err(e) => {
                log::warn!("Lookup of '{}' failed: {}", variant, e);
                last_error = Some(e);
            }
        }
    }

    match search_best_title(client, raw_name, game, min_similarity).await {
        Ok(Some(title)) => match client.parse_page(game, &title).await {
            Ok(Some(page)) => {
                log::info!("Resolved '{}' to '{}' via search", raw_name, page.title);
                return Ok(Some(page));
            }
            Ok(None) => any_answered = true,
            Err(e) => last_error = Some(e),
        },
        Ok(None) => any_answered = true,
        Err(e) => {
            log::warn!("Search for '{}' failed: {}", raw_name, e);
            last_error = Some(e);
        }
    }

    match last_error {
        Some(e) if !any_answered => Err(e),
        _ => {
            log::info!("No page found for '{}'", raw_name);
            Ok(None)
        }
    }
}

/// Canonical page name for `raw_name`, or `None` when nothing matched
pub async fn resolve<T: Transport>(
    client: &WikiClient<T>,
    raw_name: &str,
    game: &str,
    min_similarity: f64,
) -> Option<String> {
    match resolve_page(client, raw_name, game, min_similarity).await {
        Ok(page) => page.map(|p| p.title),
        Err(e) => {
            log::error!("Could not resolve '{}': {}", raw_name, e);
            None
        }
    }
}

async fn search_best_title<T: Transport>(
    client: &WikiClient<T>,
    raw_name: &str,
    game: &str,
    min_similarity: f64,
) -> Result<Option<String>> {
    let hits = client.search(game, raw_name, SEARCH_LIMIT).await?;

    let best = hits
        .into_iter()
        .map(|hit| {
            let title = SEARCH_MARKUP.replace_all(&hit.title, "").into_owned();
            let score = token_overlap(&title, raw_name);
            (title, score)
        })
        .filter(|(_, score)| *score >= min_similarity)
        .fold(None::<(String, f64)>, |best, candidate| match best {
            Some(b) if b.1 >= candidate.1 => Some(b),
            _ => Some(candidate),
        });

    if let Some((title, score)) = &best {
        log::debug!("Search picked '{}' for '{}' (similarity {:.2})", title, raw_name, score);
    }
    Ok(best.map(|(title, _)| title))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants_strip_number_then_series() {
        let variants = name_variants("CCT Season 3 Oceania Series 2");
        assert_eq!(variants[0], "CCT Season 3 Oceania Series 2");
        assert_eq!(variants[1], "CCT Season 3 Oceania Series");
        assert_eq!(variants[2], "CCT Season 3 Oceania");
        assert!(!variants.iter().skip(3).any(|v| v == "CCT Season 3 Oceania Series"));
    }

    #[test]
    fn test_variants_are_unique_and_non_empty() {
        let variants = name_variants("  IEM   Katowice 2024 ");
        assert_eq!(variants, vec!["IEM Katowice 2024", "IEM Katowice", "IEM"]);

        assert_eq!(name_variants("Major"), vec!["Major"]);
        assert!(name_variants("   ").is_empty());
    }

    #[test]
    fn test_trailing_season_suffix() {
        let variants = name_variants("ESL Pro League Season 19");
        assert_eq!(variants[1], "ESL Pro League Season");
        assert_eq!(variants[2], "ESL Pro League");
    }
}
