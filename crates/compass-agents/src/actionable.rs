//! Extraction of actionable recommendations from counselor replies.
//!
//! A reply marks recommendations inline with `<actionable id="ID">TEXT</actionable>`
//! and may end with a metadata block:
//!
//! ```text
//! [system]
//! actionable:
//! [ID]
//! category: Extracurricular
//! year: 10th
//! url: https://example.org
//! [/system]
//! ```
//!
//! Bracket labels address tag ids directly.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_CATEGORY: &str = "General";
pub const DEFAULT_YEAR: &str = "9th–12th";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<actionable\s+id\s*=\s*"([^"<>]+)"\s*>(.*?)</actionable>"#)
        .expect("actionable tag regex must compile")
});

static TAG_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<actionable\b").expect("tag open regex must compile"));

static SYSTEM_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\[system\](.*?)\[/system\]").expect("system block regex must compile")
});

/// A metadata block with the whitespace separating it from the reply.
static SYSTEM_BLOCK_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\s*\[system\].*?\[/system\](\s*\z)?")
        .expect("system block span regex must compile")
});

static SYSTEM_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[system\]").expect("system open regex must compile"));

static BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([^\]]+)\]$").expect("bracket regex must compile"));

static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]+)\s*:\s*(.*)$").expect("field regex must compile")
});

/// A recommendation the student can add to their plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionableItem {
    pub id: String,
    pub text: String,
    pub category: String,
    pub year: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// What to do with items whose metadata is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataPolicy {
    /// Fill in [`DEFAULT_CATEGORY`] and [`DEFAULT_YEAR`].
    #[default]
    Lenient,
    /// No block means no items; items without a bracket are dropped.
    Strict,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    pub policy: MetadataPolicy,
    /// Wrap item text in `**` in the display string.
    pub emphasize: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub items: Vec<ActionableItem>,
    pub display: String,
}

impl Extraction {
    fn unchanged(text: &str) -> Self {
        Self {
            items: Vec::new(),
            display: text.to_string(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ItemMetadata {
    category: Option<String>,
    year: Option<String>,
    url: Option<String>,
}

/// Extract with lenient metadata and plain display text.
pub fn extract(text: &str) -> Extraction {
    extract_with(text, &ExtractOptions::default())
}

pub fn extract_with(text: &str, options: &ExtractOptions) -> Extraction {
    let opened = TAG_OPEN_RE.find_iter(text).count();
    let tags: Vec<(String, String)> = TAG_RE
        .captures_iter(text)
        .map(|caps| (caps[1].trim().to_string(), normalize_text(&caps[2])))
        .collect();
    if opened != tags.len() {
        warn!(
            "malformed actionable markup: {} opening tags, {} well-formed; returning text unchanged",
            opened,
            tags.len()
        );
        return Extraction::unchanged(text);
    }

    let system_opened = SYSTEM_OPEN_RE.find_iter(text).count();
    let blocks: Vec<&str> = SYSTEM_BLOCK_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if system_opened != blocks.len() {
        warn!("unterminated [system] block; returning text unchanged");
        return Extraction::unchanged(text);
    }

    let display = render_display(text, options.emphasize);

    let metadata = if blocks.is_empty() {
        None
    } else {
        Some(parse_metadata(&blocks))
    };

    if let Some(metadata) = &metadata {
        for label in metadata.keys() {
            if !tags.iter().any(|(id, _)| id == label) {
                warn!("metadata for '{}' does not match any actionable tag; ignoring", label);
            }
        }
    }

    let items = match (options.policy, &metadata) {
        (MetadataPolicy::Strict, None) => {
            debug!("no metadata block; strict policy yields no items");
            Vec::new()
        }
        (policy, metadata) => tags
            .into_iter()
            .filter_map(|(id, text)| {
                let meta = metadata.as_ref().and_then(|m| m.get(&id));
                if meta.is_none() && policy == MetadataPolicy::Strict {
                    debug!("dropping actionable '{}' without metadata", id);
                    return None;
                }
                let meta = meta.cloned().unwrap_or_default();
                Some(ActionableItem {
                    id,
                    text,
                    category: meta.category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
                    year: meta.year.unwrap_or_else(|| DEFAULT_YEAR.to_string()),
                    url: meta.url,
                })
            })
            .collect(),
    };

    Extraction { items, display }
}

/// Replace tags with their text and drop metadata blocks.
fn render_display(text: &str, emphasize: bool) -> String {
    let replaced = TAG_RE.replace_all(text, |caps: &regex::Captures<'_>| {
        let inner = normalize_text(&caps[2]);
        if emphasize {
            format!("**{inner}**")
        } else {
            inner
        }
    });
    SYSTEM_BLOCK_SPAN_RE.replace_all(&replaced, "").into_owned()
}

/// Collapse internal whitespace so multi-line tag bodies read as one sentence.
fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_metadata(blocks: &[&str]) -> HashMap<String, ItemMetadata> {
    let mut entries: HashMap<String, ItemMetadata> = HashMap::new();
    let mut current: Option<String> = None;

    for block in blocks {
        for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.eq_ignore_ascii_case("actionable:") {
                continue;
            }
            if let Some(caps) = BRACKET_RE.captures(line) {
                let label = caps[1].trim().to_string();
                // A repeated label starts over; the last block wins.
                entries.insert(label.clone(), ItemMetadata::default());
                current = Some(label);
                continue;
            }
            let Some(label) = &current else {
                continue;
            };
            let Some(caps) = FIELD_RE.captures(line) else {
                continue;
            };
            let value = caps[2].trim();
            let Some(entry) = entries.get_mut(label) else {
                continue;
            };
            match caps[1].to_ascii_lowercase().as_str() {
                "category" if !value.is_empty() => entry.category = Some(value.to_string()),
                "year" if !value.is_empty() => entry.year = Some(value.to_string()),
                "url" => entry.url = parse_url(value),
                _ => {}
            }
        }
    }
    entries
}

fn parse_url(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") || value.eq_ignore_ascii_case("n/a")
    {
        None
    } else {
        Some(value.to_string())
    }
}
