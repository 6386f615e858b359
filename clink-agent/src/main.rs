//! Standalone offline-caching agent: precaches the static asset list and
//! serves requests cache-first, with network fallback, over a local HTTP
//! surface. Runs independently of the chat client.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use clap::Parser;
use clink_cache::{
    CacheAgent, CacheError, FetchRequest, Fetcher, RequestMode, Source, CACHE_VERSION,
};
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
struct Args {
    /// Address to serve cached assets on.
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: SocketAddr,
    /// Origin the assets are fetched from, e.g. `https://clink.example.com`.
    #[arg(long)]
    upstream: String,
    /// Directory holding the cache generations.
    #[arg(long, default_value = "clink-cache")]
    cache_dir: PathBuf,
}

struct HttpFetcher {
    client: reqwest::Client,
    upstream: String,
}

impl HttpFetcher {
    fn new(upstream: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            upstream,
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{path}", self.upstream.trim_end_matches('/'))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, CacheError> {
        let upstream_err = |err: reqwest::Error| CacheError::Upstream {
            path: path.to_owned(),
            reason: err.to_string(),
        };
        let response = self
            .client
            .get(self.url_for(path))
            .send()
            .await
            .map_err(upstream_err)?
            .error_for_status()
            .map_err(upstream_err)?;
        Ok(response.bytes().await.map_err(upstream_err)?.to_vec())
    }
}

struct AgentState {
    agent: CacheAgent,
    fetcher: HttpFetcher,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let agent = CacheAgent::new(&args.cache_dir, CACHE_VERSION);
    let fetcher = HttpFetcher::new(args.upstream);
    agent.install(&fetcher).await?;
    agent.activate().await?;

    let state = Arc::new(AgentState { agent, fetcher });
    let router = Router::new().fallback(serve).with_state(state);
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!(listen = %args.listen, "asset cache agent ready");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn serve(State(state): State<Arc<AgentState>>, uri: Uri, headers: HeaderMap) -> Response {
    let request = FetchRequest {
        path: uri.path().to_owned(),
        mode: request_mode(&headers),
    };
    match state.agent.serve(&request, &state.fetcher).await {
        Ok(served) => {
            tracing::debug!(path = %request.path, source = ?served.source, "served");
            let content_type = match served.source {
                Source::Fallback => "text/html",
                _ => content_type(&request.path),
            };
            ([(header::CONTENT_TYPE, content_type)], served.body).into_response()
        }
        Err(err) => {
            tracing::warn!(path = %request.path, %err, "request failed");
            let status = match err {
                CacheError::Unavailable(_) | CacheError::Upstream { .. } => StatusCode::BAD_GATEWAY,
                CacheError::MissingFallback(_) => StatusCode::SERVICE_UNAVAILABLE,
                CacheError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, err.to_string()).into_response()
        }
    }
}

/// Classifies a request the way the browser tags its own: top-level page
/// loads announce themselves via `Sec-Fetch-Mode: navigate` (or, for older
/// clients, an `Accept` header asking for HTML).
fn request_mode(headers: &HeaderMap) -> RequestMode {
    let wants_navigation = headers
        .get("sec-fetch-mode")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|mode| mode == "navigate")
        || headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"));
    if wants_navigation {
        RequestMode::Navigation
    } else {
        RequestMode::Resource
    }
}

fn content_type(path: &str) -> &'static str {
    match std::path::Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("html") | None => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sec_fetch_mode_marks_navigations() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-fetch-mode", "navigate".parse().unwrap());
        assert_eq!(request_mode(&headers), RequestMode::Navigation);
    }

    #[test]
    fn plain_requests_are_resources() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, "application/json".parse().unwrap());
        assert_eq!(request_mode(&headers), RequestMode::Resource);
        assert_eq!(request_mode(&HeaderMap::new()), RequestMode::Resource);
    }

    #[test]
    fn html_accept_header_marks_navigations() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            "text/html,application/xhtml+xml".parse().unwrap(),
        );
        assert_eq!(request_mode(&headers), RequestMode::Navigation);
    }
}
