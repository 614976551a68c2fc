#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use esports_wiki_scraper::{
    Aggregator, ApiRequest, ApiResponse, Config, Result, Transport, WikiClient,
};

pub const GAME: &str = "counterstrike";

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

type Handler = Box<dyn Fn(&ApiRequest) -> ApiResponse + Send + Sync>;

/// Answers every request from `handler` and records when it arrived
pub struct MockTransport {
    handler: Handler,
    calls: Mutex<Vec<(Instant, ApiRequest)>>,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new(handler: impl Fn(&ApiRequest) -> ApiResponse + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            latency: None,
        })
    }

    /// Like `new`, but every response takes `latency` to arrive
    pub fn slow(
        latency: Duration,
        handler: impl Fn(&ApiRequest) -> ApiResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            latency: Some(latency),
        })
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    /// `action` (plus `list` for queries) of each call, in order
    pub fn actions(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|r| match (r.get_param("action"), r.get_param("list")) {
                (Some(action), Some(list)) => format!("{}:{}", action, list),
                (Some(action), None) => action.to_string(),
                _ => String::new(),
            })
            .collect()
    }

    /// Pages requested through `action=parse`
    pub fn parsed_pages(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter(|r| r.get_param("action") == Some("parse"))
            .filter_map(|r| r.get_param("page").map(str::to_string))
            .collect()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest, _timeout: Duration) -> Result<ApiResponse> {
        self.calls.lock().unwrap().push((Instant::now(), request.clone()));
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok((self.handler)(request))
    }
}

// ============================================================================
// CANNED RESPONSES
// ============================================================================

fn body(value: Value) -> ApiResponse {
    ApiResponse::ok(value.to_string())
}

pub fn structured_rows(rows: Vec<Value>) -> ApiResponse {
    let items: Vec<Value> = rows.into_iter().map(|row| json!({ "title": row })).collect();
    body(json!({ "cargoquery": items }))
}

pub fn category_members(titles: &[&str]) -> ApiResponse {
    let members: Vec<Value> = titles
        .iter()
        .enumerate()
        .map(|(i, title)| json!({ "pageid": i + 1, "ns": 0, "title": title }))
        .collect();
    body(json!({ "batchcomplete": "", "query": { "categorymembers": members } }))
}

pub fn search_hits(titles: &[&str]) -> ApiResponse {
    let hits: Vec<Value> = titles
        .iter()
        .map(|title| json!({ "ns": 0, "title": title, "snippet": "" }))
        .collect();
    body(json!({ "query": { "searchinfo": { "totalhits": hits.len() }, "search": hits } }))
}

pub fn parsed_page(title: &str, wikitext: &str, html: &str) -> ApiResponse {
    body(json!({
        "parse": {
            "title": title,
            "pageid": 1000,
            "wikitext": { "*": wikitext },
            "text": { "*": html },
        }
    }))
}

pub fn missing_page() -> ApiResponse {
    body(json!({
        "error": { "code": "missingtitle", "info": "The page you specified doesn't exist." }
    }))
}

pub fn throttled() -> ApiResponse {
    ApiResponse { status: 429, body: String::new() }
}

pub fn server_error() -> ApiResponse {
    ApiResponse { status: 503, body: String::new() }
}

// ============================================================================
// PIPELINE SETUP
// ============================================================================

/// Default limits with no politeness delay between sub-resource fetches
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.source.api_url = "https://wiki.test/{game}/api.php".to_string();
    config.source.page_url = "https://wiki.test/{game}/{page}".to_string();
    config.pipeline.item_spacing_ms = 0;
    config
}

pub fn client(transport: Arc<MockTransport>) -> WikiClient<Arc<MockTransport>> {
    WikiClient::with_transport(transport, &test_config())
}

pub fn aggregator(transport: Arc<MockTransport>) -> Aggregator<Arc<MockTransport>> {
    let config = test_config();
    Aggregator::new(WikiClient::with_transport(transport, &config), config.pipeline)
}
