use crate::types::{AggregatorError, ParsedEntry, ParsedFeed, Result};
use chrono::{DateTime, Utc};
use feed_rs::parser;
use std::collections::HashSet;
use tracing::{debug, info};

/// RSS/Atom parsing on top of feed-rs.
pub struct FeedParser;

impl FeedParser {
    /// Parse a feed document.
    ///
    /// Entries without a link are dropped, as are repeated links within the
    /// same document. A document that cannot be parsed at all is an error.
    pub fn parse_feed(content: &str) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| AggregatorError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);
        let mut seen_urls = HashSet::new();
        let mut entries = Vec::new();

        for entry in feed.entries {
            let Some(parsed) = Self::parse_entry(entry) else {
                continue;
            };
            if !seen_urls.insert(parsed.url.clone()) {
                debug!("Skipping duplicate entry with URL: {}", parsed.url);
                continue;
            }
            entries.push(parsed);
        }

        info!("Parsed feed with {} entries", entries.len());

        Ok(ParsedFeed { title, entries })
    }

    fn parse_entry(entry: feed_rs::model::Entry) -> Option<ParsedEntry> {
        let url = entry
            .links
            .iter()
            .map(|link| link.href.trim())
            .find(|href| !href.is_empty())?
            .to_string();

        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty());

        // Prefer the full body, fall back to the summary
        let content = entry
            .content
            .and_then(|c| c.body)
            .filter(|body| !body.is_empty())
            .or_else(|| entry.summary.map(|s| s.content));

        let author = entry
            .authors
            .into_iter()
            .map(|a| a.name)
            .find(|name| !name.trim().is_empty());

        let published_at = resolve_published(entry.published, entry.updated);

        Some(ParsedEntry {
            url,
            title,
            content,
            author,
            published_at,
        })
    }
}

/// Publication date of an entry: the published stamp, else the updated one.
pub fn resolve_published(
    published: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    published.or(updated)
}
