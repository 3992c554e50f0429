mod error;
mod types;

use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::NetworkSection;

pub use error::{ResolverError, ResolverResult};
pub use types::{BroadcastMetadata, LifecycleState};

/// Public anonymous-access bearer token shipped in the platform's web
/// client. Grants guest-scoped API access only.
pub const GUEST_BEARER_TOKEN: &str = "Bearer AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs=1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

const LANDING_PAGE_URL: &str = "https://twitter.com/";
const AUDIO_SPACE_ENDPOINT: &str =
    "https://twitter.com/i/api/graphql/jyQ0_DEMZHeoluCgHJ-U5Q/AudioSpaceById";

/// Resolves a space id into its [`BroadcastMetadata`] snapshot. The
/// guest token and the snapshot are memoized per instance, so one run
/// performs one scrape and one metadata query at most.
pub struct SpaceResolver {
    client: Client,
    space_id: String,
    guest_token: OnceCell<String>,
    metadata: OnceCell<BroadcastMetadata>,
}

impl SpaceResolver {
    pub fn new(space_id: impl Into<String>, network: &NetworkSection) -> ResolverResult<Self> {
        let client = Client::builder()
            .user_agent(&network.user_agent)
            .timeout(network.request_timeout())
            .build()?;
        Ok(Self {
            client,
            space_id: space_id.into(),
            guest_token: OnceCell::new(),
            metadata: OnceCell::new(),
        })
    }

    /// Pulls the opaque space id out of a `…/spaces/<id>` URL.
    pub fn space_id_from_url(url: &str) -> Option<String> {
        let pattern = Regex::new(r"spaces/(\w+)").ok()?;
        pattern
            .captures(url)
            .map(|caps| caps[1].to_string())
    }

    pub async fn resolve(&self) -> ResolverResult<&BroadcastMetadata> {
        self.metadata
            .get_or_try_init(|| async { self.fetch_metadata().await })
            .await
    }

    async fn fetch_metadata(&self) -> ResolverResult<BroadcastMetadata> {
        let token = self.guest_token().await?;
        let variables = serde_json::json!({
            "id": self.space_id,
            "isMetatagsQuery": false,
            "withSuperFollowsUserFields": true,
            "withUserResults": true,
            "withBirdwatchPivots": false,
            "withReactionsMetadata": false,
            "withReactionsPerspective": false,
            "withSuperFollowsTweetFields": true,
            "withReplays": true,
            "withScheduledSpaces": true,
        });
        let response = self
            .client
            .get(AUDIO_SPACE_ENDPOINT)
            .query(&[("variables", variables.to_string())])
            .header("authorization", GUEST_BEARER_TOKEN)
            .header("x-guest-token", token)
            .send()
            .await?;
        let body = response.text().await?;
        let value: Value =
            serde_json::from_str(&body).map_err(|err| ResolverError::Malformed {
                space_id: self.space_id.clone(),
                detail: err.to_string(),
            })?;
        BroadcastMetadata::from_response(&self.space_id, value)
    }

    async fn guest_token(&self) -> ResolverResult<&str> {
        let token = self
            .guest_token
            .get_or_try_init(|| async {
                let page = self
                    .client
                    .get(LANDING_PAGE_URL)
                    .send()
                    .await?
                    .text()
                    .await?;
                let token = extract_guest_token(&page).ok_or(ResolverError::TokenScrape)?;
                debug!(token = %token, "scraped guest token");
                Ok::<_, ResolverError>(token)
            })
            .await?;
        Ok(token.as_str())
    }

    #[cfg(test)]
    pub(crate) fn with_cached_metadata(self, metadata: BroadcastMetadata) -> Self {
        self.metadata.set(metadata).expect("metadata already cached");
        self
    }
}

/// The landing page embeds a 19-digit guest token as `gt=<digits>`.
/// This is the single point of contact with the page's markup.
pub(crate) fn extract_guest_token(html: &str) -> Option<String> {
    let pattern = Regex::new(r"gt=(\d{19})").ok()?;
    pattern
        .captures(html)
        .map(|caps| caps[1].to_string())
}
