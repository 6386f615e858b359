//! Offline asset cache with network fallback.
//!
//! A [`CacheAgent`] owns one directory of cache generations. Installing a
//! generation precaches a fixed asset list; activating it purges every stale
//! generation; serving a request is cache-first for resources and
//! network-first with an offline fallback page for navigations. The agent is
//! independent of the chat client and shares no state with it.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

/// Current cache generation tag. Bump to invalidate all precached assets;
/// [`CacheAgent::activate`] removes the older generations wholesale.
pub const CACHE_VERSION: &str = "clink-v1";

/// Assets considered essential for offline operation.
pub const STATIC_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/styles.css",
    "/app.js",
    "/manifest.json",
    "/404.html",
];

/// Page served for navigation requests when the network is unreachable.
pub const OFFLINE_FALLBACK: &str = "/404.html";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("upstream fetch of {path} failed: {reason}")]
    Upstream { path: String, reason: String },
    #[error("offline fallback {0} is not cached")]
    MissingFallback(&'static str),
    #[error("{0} is not cached and the network is unreachable")]
    Unavailable(String),
}

impl CacheError {
    fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// The network capability the agent falls back to. Injected so the serving
/// policies can be exercised without a live upstream.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, CacheError>;
}

/// What kind of request is being served.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestMode {
    /// A top-level page load; network-first with the offline fallback.
    Navigation,
    /// Everything else; cache-first with network fall-through.
    Resource,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchRequest {
    pub path: String,
    pub mode: RequestMode,
}

/// Where a served response came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Source {
    Cache,
    Network,
    Fallback,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Served {
    pub body: Vec<u8>,
    pub source: Source,
}

#[derive(Debug)]
pub struct CacheAgent {
    root: PathBuf,
    version: String,
}

impl CacheAgent {
    pub fn new(root: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            version: version.into(),
        }
    }

    fn generation_dir(&self) -> PathBuf {
        self.root.join(&self.version)
    }

    /// Precaches every path in [`STATIC_ASSETS`] into the current
    /// generation. The populate is atomic: assets land in a staging
    /// directory that only replaces the generation once every fetch has
    /// succeeded, and the agent is ready as soon as this returns — there is
    /// no waiting on an older generation to wind down.
    pub async fn install(&self, fetcher: &dyn Fetcher) -> Result<(), CacheError> {
        let staging = self.root.join(format!(".staging-{}", self.version));
        if fs::metadata(&staging).await.is_ok() {
            fs::remove_dir_all(&staging)
                .await
                .map_err(CacheError::io(&staging))?;
        }
        fs::create_dir_all(&staging)
            .await
            .map_err(CacheError::io(&staging))?;

        for asset in STATIC_ASSETS {
            let body = match fetcher.fetch(asset).await {
                Ok(body) => body,
                Err(err) => {
                    // partial generations must not become servable
                    let _ = fs::remove_dir_all(&staging).await;
                    return Err(err);
                }
            };
            let file = staging.join(cache_key(asset));
            fs::write(&file, body)
                .await
                .map_err(CacheError::io(&file))?;
        }

        let generation = self.generation_dir();
        if fs::metadata(&generation).await.is_ok() {
            fs::remove_dir_all(&generation)
                .await
                .map_err(CacheError::io(&generation))?;
        }
        fs::rename(&staging, &generation)
            .await
            .map_err(CacheError::io(&generation))?;
        tracing::info!(version = %self.version, assets = STATIC_ASSETS.len(), "cache generation installed");
        Ok(())
    }

    /// Deletes every cache generation other than the current one.
    pub async fn activate(&self) -> Result<(), CacheError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            // nothing installed yet, nothing to purge
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(CacheError::io(&self.root)(err)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(CacheError::io(&self.root))?
        {
            if entry.file_name() == self.version.as_str() {
                continue;
            }
            let path = entry.path();
            tracing::info!(stale = %path.display(), "purging stale cache generation");
            fs::remove_dir_all(&path)
                .await
                .map_err(CacheError::io(&path))?;
        }
        Ok(())
    }

    /// The cached body for a path, if any.
    pub async fn lookup(&self, path: &str) -> Option<Vec<u8>> {
        fs::read(self.generation_dir().join(cache_key(path)))
            .await
            .ok()
    }

    /// Serves one request according to its [`RequestMode`]. Responses
    /// fetched from the network are never written back into the cache; the
    /// asset list is static.
    pub async fn serve(
        &self,
        request: &FetchRequest,
        fetcher: &dyn Fetcher,
    ) -> Result<Served, CacheError> {
        match request.mode {
            RequestMode::Navigation => match fetcher.fetch(&request.path).await {
                Ok(body) => Ok(Served {
                    body,
                    source: Source::Network,
                }),
                Err(err) => {
                    tracing::warn!(path = %request.path, %err, "navigation fetch failed, serving offline fallback");
                    let body = self
                        .lookup(OFFLINE_FALLBACK)
                        .await
                        .ok_or(CacheError::MissingFallback(OFFLINE_FALLBACK))?;
                    Ok(Served {
                        body,
                        source: Source::Fallback,
                    })
                }
            },
            RequestMode::Resource => {
                if let Some(body) = self.lookup(&request.path).await {
                    return Ok(Served {
                        body,
                        source: Source::Cache,
                    });
                }
                let body = fetcher
                    .fetch(&request.path)
                    .await
                    .map_err(|_| CacheError::Unavailable(request.path.clone()))?;
                Ok(Served {
                    body,
                    source: Source::Network,
                })
            }
        }
    }
}

/// Maps a request path to a flat file name within a generation directory.
/// `/` and `/index.html` are distinct entries, matching the precache list.
fn cache_key(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "__root".to_owned()
    } else {
        trimmed.replace('/', "__")
    }
}
