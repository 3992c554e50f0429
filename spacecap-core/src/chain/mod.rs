mod error;

use reqwest::Client;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use crate::config::NetworkSection;
use crate::resolver::{BroadcastMetadata, LifecycleState, GUEST_BEARER_TOKEN};

pub use error::{ChainError, ChainResult};

const LIVE_STATUS_ENDPOINT: &str = "https://twitter.com/i/api/1.1/live_video_stream/status/";

/// Platform naming convention, not a standards-based URL operation: the
/// dynamic playback URL becomes the master playlist URL by dropping this
/// query suffix and swapping `dynamic` for `master`.
const DYNAMIC_QUERY_SUFFIX: &str = "?type=live";
const DYNAMIC_SEGMENT: &str = "dynamic";
const MASTER_SEGMENT: &str = "master";
const MASTER_PLAYLIST_FILE: &str = "master_playlist.m3u8";

/// The master playlist body carries the chunk-playlist path at this
/// fixed line. An external, uncontrolled format; see
/// [`chunk_playlist_path`] for the guard.
pub const CHUNK_PLAYLIST_LINE_INDEX: usize = 3;

const CHUNK_TOKEN: &str = "chunk";

/// Endpoints derived from one broadcast's metadata, cached for the run
/// so an in-flight capture keeps a stable reference even if the
/// broadcast transitions state.
#[derive(Debug, Clone)]
pub struct StreamEndpoints {
    /// Live playback endpoint. Absent when derivation started from a
    /// caller-supplied master URL.
    pub dynamic_url: Option<String>,
    pub master_url: String,
    pub chunk_playlist_url: String,
    /// Chunk playlist body with every segment reference made absolute.
    pub playlist_text: String,
}

/// Walks media key → live status → dynamic URL → master URL → chunk
/// playlist → rewritten playlist text. Each step feeds the next; the
/// result is memoized on first derivation.
pub struct UrlChain {
    client: Client,
    master_override: Option<String>,
    endpoints: OnceCell<StreamEndpoints>,
}

impl UrlChain {
    pub fn new(network: &NetworkSection) -> ChainResult<Self> {
        let client = Client::builder()
            .user_agent(&network.user_agent)
            .timeout(network.request_timeout())
            .build()?;
        Ok(Self {
            client,
            master_override: None,
            endpoints: OnceCell::new(),
        })
    }

    /// Skips the live-status lookup and enters the chain at the master
    /// playlist fetch. The only way to capture an already-ended space.
    pub fn with_master_override(mut self, master_url: impl Into<String>) -> Self {
        self.master_override = Some(master_url.into());
        self
    }

    pub async fn derive(&self, metadata: &BroadcastMetadata) -> ChainResult<&StreamEndpoints> {
        self.endpoints
            .get_or_try_init(|| async { self.derive_fresh(metadata).await })
            .await
    }

    async fn derive_fresh(&self, metadata: &BroadcastMetadata) -> ChainResult<StreamEndpoints> {
        let (dynamic_url, master_url) = match &self.master_override {
            Some(master) => (None, master.clone()),
            None => {
                if metadata.state == LifecycleState::Ended {
                    return Err(ChainError::BroadcastEnded {
                        space_id: metadata.id.clone(),
                    });
                }
                let dynamic = self.dynamic_url(metadata).await?;
                let master = master_url_from_dynamic(&dynamic);
                (Some(dynamic), master)
            }
        };
        debug!(master_url = %master_url, "derived master playlist url");

        let master_body = self.fetch_text(&master_url).await?;
        let chunk_playlist_url = chunk_playlist_url(&master_url, &master_body)?;
        let raw_playlist = self.fetch_text(&chunk_playlist_url).await?;
        let playlist_text = rewrite_playlist(&raw_playlist, &master_url);

        Ok(StreamEndpoints {
            dynamic_url,
            master_url,
            chunk_playlist_url,
            playlist_text,
        })
    }

    async fn dynamic_url(&self, metadata: &BroadcastMetadata) -> ChainResult<String> {
        let status_url = format!("{LIVE_STATUS_ENDPOINT}{}", metadata.media_key);
        let body = self
            .client
            .get(&status_url)
            .header("authorization", GUEST_BEARER_TOKEN)
            .header("cookie", "auth_token=")
            .send()
            .await?
            .text()
            .await?;
        // A torn-down stream answers with a non-JSON body.
        let status: Value =
            serde_json::from_str(&body).map_err(|_| ChainError::StreamUnavailable {
                media_key: metadata.media_key.clone(),
                detail: "live status response is not json".to_string(),
            })?;
        match status["source"]["location"].as_str() {
            Some(location) => Ok(location.to_string()),
            None => Err(ChainError::StreamUnavailable {
                media_key: metadata.media_key.clone(),
                detail: format!("live status carries no source.location: {status}"),
            }),
        }
    }

    async fn fetch_text(&self, url: &str) -> ChainResult<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Purely textual transform from the dynamic playback URL to the master
/// playlist URL.
pub fn master_url_from_dynamic(dynamic_url: &str) -> String {
    dynamic_url
        .strip_suffix(DYNAMIC_QUERY_SUFFIX)
        .unwrap_or(dynamic_url)
        .replace(DYNAMIC_SEGMENT, MASTER_SEGMENT)
}

/// Combines the master URL's authority with the chunk-playlist path
/// found in the master body.
pub fn chunk_playlist_url(master_url: &str, master_body: &str) -> ChainResult<String> {
    let path = chunk_playlist_path(master_body)?;
    let base = Url::parse(master_url).map_err(|source| ChainError::Url {
        url: master_url.to_string(),
        source,
    })?;
    let joined = base.join(&path).map_err(|source| ChainError::Url {
        url: path.clone(),
        source,
    })?;
    Ok(joined.to_string())
}

fn chunk_playlist_path(master_body: &str) -> ChainResult<String> {
    if !master_body.trim_start().starts_with("#EXTM3U") {
        return Err(ChainError::PlaylistFormat(
            "master body is missing the #EXTM3U header".to_string(),
        ));
    }
    let line = master_body
        .lines()
        .nth(CHUNK_PLAYLIST_LINE_INDEX)
        .ok_or_else(|| {
            ChainError::PlaylistFormat(format!(
                "master body ends before line {CHUNK_PLAYLIST_LINE_INDEX}"
            ))
        })?;
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Err(ChainError::PlaylistFormat(format!(
            "line {CHUNK_PLAYLIST_LINE_INDEX} is not a playlist path: {line:?}"
        )));
    }
    Ok(line.to_string())
}

/// Prefixes every line-leading chunk reference with the master URL minus
/// its playlist filename, making each segment independently fetchable.
/// Applied to fresh playlist text each token is prefixed exactly once.
pub fn rewrite_playlist(raw: &str, master_url: &str) -> String {
    let base = master_url
        .strip_suffix(MASTER_PLAYLIST_FILE)
        .unwrap_or(master_url);
    let mut rewritten = String::with_capacity(raw.len());
    for line in raw.lines() {
        if line.starts_with(CHUNK_TOKEN) {
            rewritten.push_str(base);
        }
        rewritten.push_str(line);
        rewritten.push('\n');
    }
    rewritten
}
