use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::config::Config;
use crate::error::{Result, ScrapeError};
use crate::governor::{ApiRequest, Governor, HttpTransport, RateClass, Transport};
use crate::utils::page_id;

/// One structured-query row keyed by field alias
pub type Row = HashMap<String, String>;

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// A bulk query against one of the wiki's structured tables
#[derive(Debug, Clone)]
pub struct StructuredQuery {
    pub table: String,
    /// `Table.column=alias` pairs, aliases become the row keys
    pub fields: Vec<String>,
    pub conditions: Option<String>,
    pub order_by: Option<String>,
    pub limit: usize,
}

impl StructuredQuery {
    pub fn new(table: &str, fields: &[&str], limit: usize) -> StructuredQuery {
        StructuredQuery {
            table: table.to_string(),
            fields: fields.iter().map(|f| format!("{}.{}", table, f)).collect(),
            conditions: None,
            order_by: None,
            limit,
        }
    }

    pub fn filter(mut self, conditions: impl Into<String>) -> StructuredQuery {
        self.conditions = Some(conditions.into());
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> StructuredQuery {
        self.order_by = Some(order.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PageRef {
    #[serde(rename = "pageid", default)]
    pub page_id: u64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

/// Wikitext and rendered HTML of one page
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    /// Title after redirects, the canonical page name
    pub title: String,
    pub page_id: u64,
    pub wikitext: String,
    pub html: Option<String>,
}

// ============================================================================
// RESPONSE ENVELOPES
// ============================================================================

#[derive(Deserialize)]
struct ApiErrorBody {
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Deserialize)]
struct StructuredEnvelope {
    #[serde(default)]
    cargoquery: Vec<StructuredItem>,
}

#[derive(Deserialize)]
struct StructuredItem {
    title: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct QueryEnvelope<T> {
    query: Option<T>,
}

#[derive(Deserialize)]
struct CategoryMembers {
    #[serde(default)]
    categorymembers: Vec<PageRef>,
}

#[derive(Deserialize)]
struct SearchResults {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct ParseEnvelope {
    parse: ParseBody,
}

#[derive(Deserialize)]
struct ParseBody {
    title: String,
    #[serde(default)]
    pageid: u64,
    wikitext: Option<Content>,
    text: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(rename = "*")]
    content: String,
}

/// Decodes a JSON envelope, turning an `error` object into `ScrapeError::Api`
fn decode<D: DeserializeOwned>(body: &str) -> Result<D> {
    let value: Value = serde_json::from_str(body)?;
    if let Some(error) = value.get("error") {
        let error: ApiErrorBody = serde_json::from_value(error.clone())?;
        return Err(ScrapeError::Api {
            code: error.code,
            info: error.info,
        });
    }
    Ok(serde_json::from_value(value)?)
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Typed access to the wiki API; every call goes through the governor
pub struct WikiClient<T = HttpTransport> {
    governor: Governor<T>,
    api_url: String,
    page_url: String,
    fallback_cap: usize,
}

impl WikiClient<HttpTransport> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(config.rate_limits.request_timeout())?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: Transport> WikiClient<T> {
    pub fn with_transport(transport: T, config: &Config) -> Self {
        let user_agent = config.source.user_agent.clone();
        let governor = Governor::new(transport, &config.rate_limits, user_agent);
        Self {
            governor,
            api_url: config.source.api_url.clone(),
            page_url: config.source.page_url.clone(),
            fallback_cap: config.pipeline.fallback_cap,
        }
    }

    pub fn governor(&self) -> &Governor<T> {
        &self.governor
    }

    pub fn fallback_cap(&self) -> usize {
        self.fallback_cap
    }

    pub fn api_url(&self, game: &str) -> String {
        self.api_url.replace("{game}", game)
    }

    /// Public URL of a page, used as a record's `source_url`
    pub fn page_url(&self, game: &str, title: &str) -> String {
        self.page_url.replace("{game}", game).replace("{page}", &page_id(title))
    }

    fn request(&self, game: &str, action: &str) -> ApiRequest {
        ApiRequest::new(self.api_url(game))
            .param("action", action)
            .param("format", "json")
    }

    /// Structured bulk query, null fields are dropped from each row
    pub async fn structured_query(&self, game: &str, query: &StructuredQuery) -> Result<Vec<Row>> {
        let mut request = self
            .request(game, "cargoquery")
            .param("tables", query.table.clone())
            .param("fields", query.fields.join(","))
            .param("limit", query.limit.to_string());
        if let Some(conditions) = &query.conditions {
            request = request.param("where", conditions.clone());
        }
        if let Some(order) = &query.order_by {
            request = request.param("order_by", order.clone());
        }

        let response = self.governor.execute(request, RateClass::BulkQuery).await?;
        let envelope: StructuredEnvelope = decode(&response.body)?;
        let rows = envelope
            .cargoquery
            .into_iter()
            .map(|item| {
                item.title
                    .into_iter()
                    .filter_map(|(key, value)| value_to_string(value).map(|v| (key, v)))
                    .filter(|(_, v)| !v.trim().is_empty())
                    .collect::<Row>()
            })
            .collect();
        Ok(rows)
    }

    /// Pages in `Category:<category>`, at most `limit`
    pub async fn category_members(
        &self,
        game: &str,
        category: &str,
        limit: usize,
    ) -> Result<Vec<PageRef>> {
        let request = self
            .request(game, "query")
            .param("list", "categorymembers")
            .param("cmtitle", format!("Category:{}", category))
            .param("cmnamespace", "0")
            .param("cmlimit", limit.to_string());

        let response = self.governor.execute(request, RateClass::Standard).await?;
        let envelope: QueryEnvelope<CategoryMembers> = decode(&response.body)?;
        let mut members = envelope.query.map(|q| q.categorymembers).unwrap_or_default();
        members.truncate(limit);
        Ok(members)
    }

    /// Direct page lookup. `Ok(None)` when the page does not exist.
    pub async fn parse_page(&self, game: &str, title: &str) -> Result<Option<ParsedPage>> {
        let request = self
            .request(game, "parse")
            .param("page", title)
            .param("prop", "wikitext|text")
            .param("redirects", "1");

        let response = self.governor.execute(request, RateClass::Intensive).await?;
        let envelope: ParseEnvelope = match decode(&response.body) {
            Ok(envelope) => envelope,
            Err(e) if e.is_missing_page() => return Ok(None),
            Err(e) => return Err(e),
        };

        let body = envelope.parse;
        Ok(Some(ParsedPage {
            title: body.title,
            page_id: body.pageid,
            wikitext: body.wikitext.map(|c| c.content).unwrap_or_default(),
            html: body.text.map(|c| c.content),
        }))
    }

    /// Full-text search over main namespace titles and content
    pub async fn search(&self, game: &str, text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let request = self
            .request(game, "query")
            .param("list", "search")
            .param("srsearch", text)
            .param("srnamespace", "0")
            .param("srlimit", limit.to_string());

        let response = self.governor.execute(request, RateClass::Standard).await?;
        let envelope: QueryEnvelope<SearchResults> = decode(&response.body)?;
        Ok(envelope.query.map(|q| q.search).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_api_error() {
        let body = r#"{"error":{"code":"missingtitle","info":"The page you specified doesn't exist."}}"#;
        let err = decode::<ParseEnvelope>(body).err().unwrap();
        assert!(err.is_missing_page());
    }

    #[test]
    fn test_decode_structured_rows() {
        let envelope: StructuredEnvelope = decode(
            r#"{"cargoquery":[{"title":{"pagename":"Team Liquid","name":"Team Liquid","status":null,"earnings":1200}}]}"#,
        )
        .unwrap();
        let row: Row = envelope
            .cargoquery
            .into_iter()
            .next()
            .unwrap()
            .title
            .into_iter()
            .filter_map(|(k, v)| value_to_string(v).map(|v| (k, v)))
            .collect();
        assert_eq!(row.get("name").map(String::as_str), Some("Team Liquid"));
        assert_eq!(row.get("earnings").map(String::as_str), Some("1200"));
        assert!(!row.contains_key("status"));
    }

    #[test]
    fn test_structured_query_prefixes_fields() {
        let query = StructuredQuery::new("Teams", &["_pageName=pagename", "name=name"], 10);
        assert_eq!(query.fields, vec!["Teams._pageName=pagename", "Teams.name=name"]);
    }

    #[test]
    fn test_page_url_uses_underscores() {
        let client = WikiClient::with_transport(NoTransport, &Config::default());
        assert_eq!(
            client.page_url("counterstrike", "CCT Season 3 Oceania Series"),
            "https://liquipedia.net/counterstrike/CCT_Season_3_Oceania_Series"
        );
    }

    struct NoTransport;

    impl Transport for NoTransport {
        async fn send(
            &self,
            request: &ApiRequest,
            _timeout: std::time::Duration,
        ) -> Result<crate::governor::ApiResponse> {
            Err(ScrapeError::Transport {
                url: request.describe(),
                message: "offline".to_string(),
            })
        }
    }
}
