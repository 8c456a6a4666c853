use crate::store::Store;
use crate::traits::TextOracle;
use crate::types::{Annotation, Article, Newsletter, Result, Sentiment};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ARTICLE_CONTENT_LIMIT: usize = 8000;
pub const NEWSLETTER_CONTENT_LIMIT: usize = 15000;
pub const RAW_SUMMARY_LIMIT: usize = 500;
pub const ARTICLE_MAX_TOKENS: u32 = 500;
pub const NEWSLETTER_MAX_TOKENS: u32 = 1500;
pub const NEWSLETTER_FAILURE_SUMMARY: &str =
    "Executive summary generation failed. Please read the full newsletter below.";

/// Result of interpreting one oracle reply.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationOutcome {
    /// Every field was present and valid.
    Parsed(Annotation),
    /// Usable reply, but the named fields had to be defaulted or corrected.
    PartialFallback {
        annotation: Annotation,
        defaulted: Vec<&'static str>,
    },
    /// Nothing usable came back.
    Failed(String),
}

impl AnnotationOutcome {
    /// The annotation to store. A failed outcome falls back to the title as
    /// summary with neutral defaults.
    pub fn into_annotation(self, title: &str) -> Annotation {
        match self {
            Self::Parsed(annotation) | Self::PartialFallback { annotation, .. } => annotation,
            Self::Failed(_) => Annotation::neutral(title),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// First `limit` characters of `text`, with `...` appended when cut.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

fn prefix_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

pub fn article_prompt(article: &Article) -> String {
    let content = article
        .content
        .as_deref()
        .filter(|c| !c.is_empty())
        .unwrap_or(&article.title);
    let content = truncate_chars(content, ARTICLE_CONTENT_LIMIT);
    let category = &article.category;

    format!(
        r#"Analyze this {category} news article and provide:
1. A concise 2-3 sentence summary
2. 3-5 relevant tags (lowercase, single words or short phrases)
3. Sentiment analysis (positive, neutral, or negative)
4. Relevance score from 0.0 to 1.0 (how relevant/important is this article for professionals in {category})

Article Title: {title}

Article Content:
{content}

Respond in JSON format only, no other text:
{{
    "summary": "...",
    "tags": ["tag1", "tag2", "tag3"],
    "sentiment": "positive|neutral|negative",
    "relevance_score": 0.0-1.0
}}"#,
        title = article.title,
    )
}

pub fn newsletter_prompt(newsletter: &Newsletter) -> String {
    let content = newsletter
        .content
        .as_deref()
        .filter(|c| !c.is_empty())
        .unwrap_or(&newsletter.title);
    let content = truncate_chars(content, NEWSLETTER_CONTENT_LIMIT);

    format!(
        r#"You are analyzing the tl;dr sec cybersecurity newsletter. Create an executive summary that helps security professionals quickly understand the most important topics covered.

Newsletter Title: {title}

Newsletter Content:
{content}

Provide an executive summary with the following structure:
1. Key Themes (2-3 major themes covered in this issue)
2. Critical Alerts (any urgent security issues, vulnerabilities, or threats mentioned)
3. Notable Tools & Resources (interesting tools, frameworks, or resources shared)
4. Industry Trends (emerging patterns or shifts in the security landscape)
5. Actionable Takeaways (3-5 specific actions readers should consider)

Format your response as clean, scannable bullet points. Be concise but comprehensive. Focus on information that security professionals would find most valuable."#,
        title = newsletter.title,
    )
}

/// Interpret an oracle reply.
///
/// The reply is expected to contain a JSON object somewhere in it; the span
/// from the first `{` to the last `}` is decoded. Without any object the
/// raw text becomes the summary.
pub fn parse_annotation(raw: &str) -> AnnotationOutcome {
    let raw = raw.trim();

    let span = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if end > start => &raw[start..=end],
        _ => {
            return AnnotationOutcome::PartialFallback {
                annotation: Annotation::neutral(prefix_chars(raw, RAW_SUMMARY_LIMIT)),
                defaulted: vec!["tags", "sentiment", "relevance_score"],
            };
        }
    };

    let object = match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(object)) => object,
        Ok(other) => return AnnotationOutcome::Failed(format!("expected a JSON object, got {}", other)),
        Err(e) => return AnnotationOutcome::Failed(format!("invalid JSON: {}", e)),
    };

    let mut defaulted = Vec::new();
    let summary = read_summary(&object, &mut defaulted);
    let tags = read_tags(&object, &mut defaulted);
    let sentiment = read_sentiment(&object, &mut defaulted);
    let relevance_score = read_relevance(&object, &mut defaulted);

    let annotation = Annotation {
        summary,
        tags,
        sentiment,
        relevance_score,
    };

    if defaulted.is_empty() {
        AnnotationOutcome::Parsed(annotation)
    } else {
        AnnotationOutcome::PartialFallback { annotation, defaulted }
    }
}

fn read_summary(object: &Map<String, Value>, defaulted: &mut Vec<&'static str>) -> String {
    match object.get("summary") {
        Some(Value::String(summary)) => summary.trim().to_string(),
        _ => {
            defaulted.push("summary");
            String::new()
        }
    }
}

fn read_tags(object: &Map<String, Value>, defaulted: &mut Vec<&'static str>) -> Vec<String> {
    let Some(Value::Array(values)) = object.get("tags") else {
        defaulted.push("tags");
        return Vec::new();
    };

    let tags: Vec<String> = values
        .iter()
        .filter_map(Value::as_str)
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect();

    if tags.len() != values.len() {
        defaulted.push("tags");
    }
    tags
}

fn read_sentiment(object: &Map<String, Value>, defaulted: &mut Vec<&'static str>) -> Sentiment {
    match object.get("sentiment").and_then(Value::as_str).map(str::parse::<Sentiment>) {
        Some(Ok(sentiment)) => sentiment,
        _ => {
            defaulted.push("sentiment");
            Sentiment::Neutral
        }
    }
}

fn read_relevance(object: &Map<String, Value>, defaulted: &mut Vec<&'static str>) -> f64 {
    let score = match object.get("relevance_score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match score.filter(|s| s.is_finite()) {
        Some(score) if (0.0..=1.0).contains(&score) => score,
        Some(score) => {
            defaulted.push("relevance_score");
            score.clamp(0.0, 1.0)
        }
        None => {
            defaulted.push("relevance_score");
            Annotation::DEFAULT_RELEVANCE
        }
    }
}

/// Enriches stored articles and newsletters through the oracle.
pub struct Annotator {
    store: Store,
    oracle: Arc<dyn TextOracle>,
}

impl Annotator {
    pub fn new(store: Store, oracle: Arc<dyn TextOracle>) -> Self {
        Self { store, oracle }
    }

    /// Ask the oracle about `article` and interpret the reply.
    pub async fn annotate(&self, article: &Article) -> AnnotationOutcome {
        let prompt = article_prompt(article);
        match self.oracle.complete(&prompt, ARTICLE_MAX_TOKENS).await {
            Ok(reply) => parse_annotation(&reply),
            Err(e) => AnnotationOutcome::Failed(e.to_string()),
        }
    }

    /// Annotate one article in memory. Already processed articles come back
    /// unchanged; every other article comes back processed, whatever the
    /// oracle did.
    pub async fn process_article(&self, mut article: Article) -> Article {
        if article.processed {
            return article;
        }

        let outcome = self.annotate(&article).await;
        match &outcome {
            AnnotationOutcome::Parsed(_) => debug!("Annotated {}", article.url),
            AnnotationOutcome::PartialFallback { defaulted, .. } => {
                debug!("Annotated {} with defaults for {:?}", article.url, defaulted)
            }
            AnnotationOutcome::Failed(reason) => {
                warn!("Annotation failed for article {}: {}", article.id, reason)
            }
        }

        let annotation = outcome.into_annotation(&article.title);
        article.apply_annotation(annotation, Utc::now());
        article
    }

    /// Annotate up to `limit` unprocessed articles and commit them together.
    pub async fn process_unprocessed_articles(&self, limit: usize) -> Result<usize> {
        let pending = self.store.unprocessed_articles(limit).await?;
        let mut processed = Vec::with_capacity(pending.len());

        for article in pending {
            debug!("Processing: {}", prefix_chars(&article.title, 50));
            processed.push(self.process_article(article).await);
        }

        self.store.save_annotations(&processed).await?;
        info!("Processed {} articles", processed.len());

        Ok(processed.len())
    }

    /// Generate and store the executive summary of `newsletter`. A failed
    /// oracle call stores a fixed placeholder instead.
    pub async fn process_newsletter(&self, mut newsletter: Newsletter) -> Result<Newsletter> {
        if newsletter.processed {
            return Ok(newsletter);
        }

        let prompt = newsletter_prompt(&newsletter);
        let summary = match self.oracle.complete(&prompt, NEWSLETTER_MAX_TOKENS).await {
            Ok(reply) => reply.trim().to_string(),
            Err(e) => {
                warn!("Executive summary failed for newsletter {}: {}", newsletter.id, e);
                NEWSLETTER_FAILURE_SUMMARY.to_string()
            }
        };

        newsletter.executive_summary = Some(summary);
        newsletter.processed = true;
        self.store.save_newsletter_summary(&newsletter).await?;

        Ok(newsletter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_reply_is_parsed() {
        let reply = r#"Here you go:
{"summary": "A breach.", "tags": ["Breach", " ransomware "], "sentiment": "Negative", "relevance_score": 0.8}
Thanks"#;
        let AnnotationOutcome::Parsed(annotation) = parse_annotation(reply) else {
            panic!("expected a clean parse");
        };
        assert_eq!(annotation.summary, "A breach.");
        assert_eq!(annotation.tags, vec!["breach", "ransomware"]);
        assert_eq!(annotation.sentiment, Sentiment::Negative);
        assert_eq!(annotation.relevance_score, 0.8);
    }

    #[test]
    fn missing_fields_are_defaulted_and_listed() {
        let outcome = parse_annotation(r#"{"summary": "Only this."}"#);
        let AnnotationOutcome::PartialFallback { annotation, defaulted } = outcome else {
            panic!("expected a partial fallback");
        };
        assert_eq!(annotation.summary, "Only this.");
        assert!(annotation.tags.is_empty());
        assert_eq!(annotation.sentiment, Sentiment::Neutral);
        assert_eq!(annotation.relevance_score, 0.5);
        assert_eq!(defaulted, vec!["tags", "sentiment", "relevance_score"]);
    }

    #[test]
    fn out_of_range_relevance_is_clamped() {
        let outcome = parse_annotation(
            r#"{"summary": "s", "tags": [], "sentiment": "ecstatic", "relevance_score": 7}"#,
        );
        let AnnotationOutcome::PartialFallback { annotation, defaulted } = outcome else {
            panic!("expected a partial fallback");
        };
        assert_eq!(annotation.relevance_score, 1.0);
        assert_eq!(annotation.sentiment, Sentiment::Neutral);
        assert_eq!(defaulted, vec!["sentiment", "relevance_score"]);
    }

    #[test]
    fn numeric_string_relevance_is_accepted() {
        let outcome = parse_annotation(
            r#"{"summary": "s", "tags": ["a"], "sentiment": "positive", "relevance_score": "0.25"}"#,
        );
        assert!(matches!(outcome, AnnotationOutcome::Parsed(ref a) if a.relevance_score == 0.25));
    }

    #[test]
    fn reply_without_json_becomes_the_summary() {
        let reply = "x".repeat(900);
        let annotation = parse_annotation(&reply).into_annotation("title");
        assert_eq!(annotation.summary.chars().count(), RAW_SUMMARY_LIMIT);
        assert_eq!(annotation.relevance_score, 0.5);
    }

    #[test]
    fn broken_json_fails_to_title() {
        let outcome = parse_annotation(r#"{"summary": "unterminated}"#);
        assert!(outcome.is_failed());
        let annotation = outcome.into_annotation("The Title");
        assert_eq!(annotation.summary, "The Title");
        assert_eq!(annotation.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(10);
        assert_eq!(truncate_chars(&text, 4), "éééé...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
