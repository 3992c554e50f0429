use chrono::{TimeZone, Utc};

use crate::resolver::BroadcastMetadata;

pub const DEFAULT_NAME_TEMPLATE: &str = "[%(creator_name)s]%(title)s-%(id)s";

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Fields available for filename templating, all pre-rendered to strings.
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    pub id: String,
    pub url: String,
    pub title: String,
    pub creator_name: String,
    pub creator_screen_name: String,
    pub start_date: String,
}

impl NameContext {
    pub fn from_metadata(metadata: &BroadcastMetadata) -> Self {
        let start_date = metadata
            .started_at_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|when| when.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        Self {
            id: metadata.id.clone(),
            url: format!("https://twitter.com/spaces/{}", metadata.id),
            title: metadata.title.clone(),
            creator_name: metadata.creator_name.clone(),
            creator_screen_name: metadata.creator_screen_name.clone(),
            start_date,
        }
    }

    /// Substitutes `%(field)s` tokens. Unknown tokens are left verbatim.
    pub fn render(&self, template: &str) -> String {
        let fields = [
            ("id", &self.id),
            ("url", &self.url),
            ("title", &self.title),
            ("creator_name", &self.creator_name),
            ("creator_screen_name", &self.creator_screen_name),
            ("start_date", &self.start_date),
        ];
        let mut rendered = template.to_string();
        for (key, value) in fields {
            rendered = rendered.replace(&format!("%({key})s"), value);
        }
        rendered
    }
}

/// Replaces filesystem-reserved characters so the rendered name is a
/// valid single path component on every supported platform.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
        .collect()
}
