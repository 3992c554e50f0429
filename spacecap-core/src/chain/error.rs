use thiserror::Error;

pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error(
        "space {space_id} has ended; its master playlist is no longer discoverable \
         (re-run with the master url if you have it)"
    )]
    BroadcastEnded { space_id: String },
    #[error("stream for media key {media_key} unavailable: {detail}")]
    StreamUnavailable { media_key: String, detail: String },
    #[error("master playlist format not understood: {0}")]
    PlaylistFormat(String),
    #[error("invalid url {url}: {source}")]
    Url {
        url: String,
        source: url::ParseError,
    },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}
