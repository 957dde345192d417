use std::sync::Arc;

use htmd::HtmlToMarkdown;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use subcrawl_core::error::AppError;
use subcrawl_core::models::Candidate;
use subcrawl_core::traits::Extractor;

/// Containers tried in order when looking for the announcement body.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    ".board-view",
    ".view-content",
    ".board-content",
    ".content",
    "#content",
    ".post-content",
    ".notice-content",
];

/// Title sources, most specific first.
const TITLE_SELECTORS: &[&str] = &[
    "meta[property='og:title']",
    ".view-title",
    ".board-title",
    ".subject",
    "h1",
    "h2",
    "title",
];

/// Words that show up in real announcement bodies.
const QUALITY_KEYWORDS: &[&str] = &[
    "신청기간",
    "접수기간",
    "모집기간",
    "예산",
    "지원금액",
    "지원규모",
    "지원대상",
    "신청대상",
];

const MIN_CONTENT_CHARS: usize = 100;
const MAX_RAW_DATES: usize = 10;

/// Heuristic HTML extractor for government announcement pages.
///
/// Picks the first content container with enough text (preferring one that
/// mentions at least two announcement keywords), converts it to Markdown,
/// and pulls raw date and budget strings out of the text.
#[derive(Clone)]
pub struct HtmlExtractor {
    inner: Arc<Inner>,
}

struct Inner {
    converter: HtmlToMarkdown,
    content_selectors: Vec<Selector>,
    title_selectors: Vec<Selector>,
    body_selector: Selector,
    date_patterns: Vec<Regex>,
    budget_pattern: Regex,
}

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::Config(format!("invalid selector '{css}': {e}")))
}

fn regex(pattern: &str) -> Result<Regex, AppError> {
    Regex::new(pattern).map_err(|e| AppError::Config(format!("invalid pattern '{pattern}': {e}")))
}

impl HtmlExtractor {
    pub fn new() -> Result<Self, AppError> {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
                "form",
            ])
            .build();

        Ok(Self {
            inner: Arc::new(Inner {
                converter,
                content_selectors: CONTENT_SELECTORS
                    .iter()
                    .map(|css| selector(css))
                    .collect::<Result<_, _>>()?,
                title_selectors: TITLE_SELECTORS
                    .iter()
                    .map(|css| selector(css))
                    .collect::<Result<_, _>>()?,
                body_selector: selector("body")?,
                date_patterns: vec![
                    regex(r"\d{4}\s*년\s*\d{1,2}\s*월\s*\d{1,2}\s*일")?,
                    regex(r"\d{4}\s*[-./]\s*\d{1,2}\s*[-./]\s*\d{1,2}")?,
                ],
                budget_pattern: regex(
                    r"(예산|지원금액|지원규모|사업비|(?i:budget))[^\n]{0,40}?\d[\d,.]*\s*(억|천만|백만|만|천)?\s*원",
                )?,
            }),
        })
    }

    fn title(&self, document: &Html) -> String {
        for sel in &self.inner.title_selectors {
            for element in document.select(sel) {
                let text = match element.value().attr("content") {
                    Some(content) => collapse(content),
                    None => element_text(&element),
                };
                if !text.is_empty() {
                    return text;
                }
            }
        }
        String::new()
    }

    /// The element holding the announcement body.
    fn content_root<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        let mut fallback = None;
        for sel in &self.inner.content_selectors {
            for element in document.select(sel) {
                let text = element_text(&element);
                if text.chars().count() < MIN_CONTENT_CHARS {
                    continue;
                }
                if quality_matches(&text) >= 2 {
                    return Some(element);
                }
                fallback.get_or_insert(element);
            }
        }
        fallback.or_else(|| document.select(&self.inner.body_selector).next())
    }

    fn body_text(&self, root: &ElementRef<'_>) -> String {
        match self.inner.converter.convert(&root.html()) {
            Ok(markdown) if !markdown.trim().is_empty() => markdown.trim().to_string(),
            Ok(_) => element_text(root),
            Err(e) => {
                tracing::debug!(error = %e, "Markdown conversion failed, using plain text");
                element_text(root)
            }
        }
    }

    fn raw_dates(&self, text: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = Vec::new();
        for pattern in &self.inner.date_patterns {
            for m in pattern.find_iter(text) {
                let overlaps = found
                    .iter()
                    .any(|(start, s)| m.start() < start + s.len() && *start < m.end());
                if !overlaps {
                    found.push((m.start(), m.as_str().to_string()));
                }
            }
        }
        found.sort_by_key(|(start, _)| *start);

        let mut dates: Vec<String> = Vec::new();
        for (_, date) in found {
            if !dates.contains(&date) {
                dates.push(date);
            }
            if dates.len() == MAX_RAW_DATES {
                break;
            }
        }
        dates
    }

    fn raw_budget(&self, text: &str) -> Option<String> {
        self.inner
            .budget_pattern
            .find(text)
            .map(|m| collapse(m.as_str()))
    }
}

impl Extractor for HtmlExtractor {
    fn extract(&self, source_url: &str, raw_body: &str) -> Result<Candidate, AppError> {
        let document = Html::parse_document(raw_body);

        let title = self.title(&document);
        let body_text = self
            .content_root(&document)
            .map(|root| self.body_text(&root))
            .unwrap_or_default();

        if title.is_empty() && body_text.chars().count() < MIN_CONTENT_CHARS {
            return Err(AppError::Parse(format!(
                "no title and too little content at {source_url}"
            )));
        }

        let raw_dates = self.raw_dates(&body_text);
        let raw_budget_text = self.raw_budget(&body_text);

        tracing::debug!(
            %source_url,
            title = %title,
            chars = body_text.chars().count(),
            dates = raw_dates.len(),
            keywords = quality_matches(&body_text),
            "Extracted candidate"
        );

        Ok(Candidate {
            source_url: source_url.to_string(),
            title,
            raw_dates,
            raw_budget_text,
            body_text,
        })
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    collapse(&element.text().collect::<Vec<_>>().join(" "))
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn quality_matches(text: &str) -> usize {
    QUALITY_KEYWORDS
        .iter()
        .filter(|keyword| text.contains(*keyword))
        .count()
}
