use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use trendscout_core::{PostMetrics, TagSighting};

use crate::{ExtractionError, POST_LINK_SELECTOR};

static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\w+)").expect("valid regex"));
static VIEWS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([\d,.]+)\s*([km])?\s*view").expect("valid regex"));
static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?)\s*([kmb]\b)?").expect("valid regex")
});

const VIDEO_SELECTOR: &str = "video, svg[aria-label='Play']";
const LIKES_SELECTOR: &str = "section button span, a[href*='liked_by'] span";
const COMMENTS_SELECTOR: &str = "ul li[role='menuitem']";

fn parse_selector(selector: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(selector).map_err(|e| ExtractionError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn suffix_multiplier(suffix: Option<&str>) -> f64 {
    match suffix.map(str::to_ascii_lowercase).as_deref() {
        Some("k") => 1_000.0,
        Some("m") => 1_000_000.0,
        Some("b") => 1_000_000_000.0,
        _ => 1.0,
    }
}

/// Parse counters such as `"1,204 likes"`, `"845"` or `"1.2K"`.
pub fn parse_compact_count(text: &str) -> Option<u64> {
    let caps = COUNT_RE.captures(text)?;
    let number: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let value = number * suffix_multiplier(caps.get(2).map(|m| m.as_str()));
    Some(value.round() as u64)
}

/// Parse a view counter such as `"12.5K views"` or `"1.2M views"`.
pub fn parse_view_count(text: &str) -> Option<u64> {
    let caps = VIEWS_RE.captures(text)?;
    let number: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let value = number * suffix_multiplier(caps.get(2).map(|m| m.as_str()));
    Some(value.round() as u64)
}

/// Hashtag sightings from the first `posts_to_scan` post links of an explore page.
///
/// Tags are returned as written; normalization and filtering happen at tally time.
pub fn extract_explore_sightings(
    html: &str,
    posts_to_scan: usize,
) -> Result<Vec<TagSighting>, ExtractionError> {
    let document = Html::parse_document(html);
    let links = parse_selector(POST_LINK_SELECTOR)?;
    let img = parse_selector("img")?;

    let mut sightings = Vec::new();
    for link in document.select(&links).take(posts_to_scan) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let alt = link
            .select(&img)
            .next()
            .and_then(|i| i.value().attr("alt"))
            .unwrap_or_default();
        sightings.extend(
            HASHTAG_RE
                .captures_iter(alt)
                .filter_map(|c| c.get(1))
                .map(|tag| TagSighting::new(tag.as_str(), href)),
        );
    }
    Ok(sightings)
}

/// Engagement counters from a rendered post page.
///
/// Views are only read for video posts and are `None` when no counter is shown.
/// A page without any readable like counter is an error so callers can fall
/// back instead of recording a false zero.
pub fn extract_post_metrics(html: &str) -> Result<PostMetrics, ExtractionError> {
    let document = Html::parse_document(html);

    let is_video = document.select(&parse_selector(VIDEO_SELECTOR)?).next().is_some();

    let mut views = None;
    if is_video {
        for selector in ["span", "div"] {
            let found = document
                .select(&parse_selector(selector)?)
                .map(element_text)
                .filter(|text| text.to_lowercase().contains("view"))
                .find_map(|text| parse_view_count(&text).filter(|v| *v > 0));
            if let Some(found) = found {
                views = Some(found);
                break;
            }
        }
    }

    let likes = document
        .select(&parse_selector(LIKES_SELECTOR)?)
        .map(element_text)
        .filter(|text| {
            text.to_lowercase().contains("like")
                || text.chars().any(|c| c.is_ascii_digit())
        })
        .find_map(|text| parse_compact_count(&text))
        .ok_or(ExtractionError::MissingLikes)?;

    let comments = document.select(&parse_selector(COMMENTS_SELECTOR)?).count() as u64;

    Ok(PostMetrics {
        likes,
        comments,
        views,
        is_video,
    })
}
