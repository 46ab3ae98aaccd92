//! Keyword-triggered structured UI payloads.
//!
//! The query is classified into a closed set of intents; each intent knows how to shape its
//! props from the retrieved sources and declines when the sources cannot support it.

use crate::retrieval::Source;
use serde::Serialize;
use serde_json::{Value, json};

const MAX_ENTRIES: usize = 5;
const TABLE_PREVIEW_CHARS: usize = 50;

const CHART_KEYWORDS: &[&str] = &["chart", "graph", "visualize", "visualise", "plot"];
const TABLE_KEYWORDS: &[&str] = &["table", "list", "show data"];
const CARD_KEYWORDS: &[&str] = &["summary card", "card"];
/// Visuals users ask for that have no renderer.
const UNRENDERABLE_KEYWORDS: &[&str] = &["diagram", "timeline", "map", "heatmap"];

/// Renderable component names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Bar chart of label/value pairs.
    Chart,
    /// Header row plus data rows.
    Table,
    /// Single headline figure.
    Card,
}

/// Component event payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Renderer name.
    pub kind: ComponentKind,
    /// Renderer-specific props.
    pub props: Value,
}

/// Structured output requested by a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiIntent {
    /// Chart keywords present.
    Chart,
    /// Table keywords present.
    Table,
    /// Card keywords present.
    Card,
    /// No structured output requested.
    None,
}

impl UiIntent {
    /// Map query text to an intent. Chart wins over table, table over card.
    pub fn classify(query: &str) -> Self {
        let query = query.to_lowercase();
        let words: Vec<&str> = query
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();

        if mentions(&query, &words, CHART_KEYWORDS) {
            UiIntent::Chart
        } else if mentions(&query, &words, TABLE_KEYWORDS) {
            UiIntent::Table
        } else if mentions(&query, &words, CARD_KEYWORDS) {
            UiIntent::Card
        } else {
            if let Some(keyword) = UNRENDERABLE_KEYWORDS
                .iter()
                .copied()
                .find(|keyword| mentions(&query, &words, &[*keyword]))
            {
                tracing::debug!(keyword, "Requested visual has no renderer; omitting component");
            }
            UiIntent::None
        }
    }

    /// Build the component for this intent, or `None` when the sources cannot fill it.
    pub fn build(self, sources: &[Source]) -> Option<Component> {
        match self {
            UiIntent::Chart => chart(sources),
            UiIntent::Table => table(sources),
            UiIntent::Card => card(sources),
            UiIntent::None => None,
        }
    }
}

/// Single words match whole tokens (plural allowed); phrases match as substrings.
fn mentions(query: &str, words: &[&str], keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| {
        if keyword.contains(' ') {
            query.contains(keyword)
        } else {
            words
                .iter()
                .any(|word| *word == *keyword || word.strip_suffix('s') == Some(*keyword))
        }
    })
}

fn page_label(page: Option<u32>) -> String {
    page.map_or_else(|| "?".to_string(), |page| page.to_string())
}

fn chart(sources: &[Source]) -> Option<Component> {
    if sources.len() < 2 {
        return None;
    }
    let data: Vec<Value> = sources
        .iter()
        .take(MAX_ENTRIES)
        .map(|source| {
            json!({
                "label": format!("Page {}", page_label(source.page)),
                "value": source.excerpt_text.chars().count(),
            })
        })
        .collect();
    Some(Component {
        kind: ComponentKind::Chart,
        props: json!({
            "title": "Content Distribution",
            "chartType": "bar",
            "data": data,
        }),
    })
}

/// First characters of the excerpt on one line, always followed by an ellipsis.
fn table_preview(text: &str) -> String {
    let head: String = text
        .chars()
        .take(TABLE_PREVIEW_CHARS)
        .map(|ch| if ch == '\r' || ch == '\n' { ' ' } else { ch })
        .collect();
    format!("{head}...")
}

fn table(sources: &[Source]) -> Option<Component> {
    if sources.is_empty() {
        return None;
    }
    let rows: Vec<Value> = sources
        .iter()
        .take(MAX_ENTRIES)
        .map(|source| {
            json!([
                source.filename,
                page_label(source.page),
                table_preview(&source.excerpt_text),
            ])
        })
        .collect();
    Some(Component {
        kind: ComponentKind::Table,
        props: json!({
            "headers": ["Source", "Page", "Preview"],
            "rows": rows,
        }),
    })
}

fn card(sources: &[Source]) -> Option<Component> {
    let top = sources.first()?;
    let count = sources.len();
    let noun = if count == 1 { "passage" } else { "passages" };
    Some(Component {
        kind: ComponentKind::Card,
        props: json!({
            "title": top.filename,
            "value": format!("{count} relevant {noun}"),
            "icon": "file-text",
            "color": "blue",
        }),
    })
}
