use thiserror::Error;

pub type ResolverResult<T> = Result<T, ResolverError>;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("guest token not found in the landing page; the page markup may have changed")]
    TokenScrape,
    #[error("space {space_id} metadata carries no media key: {response}")]
    MissingMediaKey { space_id: String, response: String },
    #[error("metadata response for space {space_id} is not valid JSON: {detail}")]
    Malformed { space_id: String, detail: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}
