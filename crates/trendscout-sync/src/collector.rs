use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use trendscout_core::{CategoryTable, HashtagObservation, TagSighting};

const MIN_TAG_CHARS: usize = 3;
const MAX_TAG_CHARS: usize = 30;

static ALL_DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverySettings {
    pub scroll_count: u32,
    pub posts_to_scan: usize,
    pub min_frequency: u32,
    pub top_n: usize,
    /// Posts sampled per hashtag for engagement.
    pub sample_size: usize,
}

/// Normalized form of a raw tag, or `None` if it would not be counted.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let tag = raw.trim().trim_start_matches('#');
    let chars = tag.chars().count();
    if !(MIN_TAG_CHARS..=MAX_TAG_CHARS).contains(&chars) {
        return None;
    }
    if ALL_DIGITS_RE.is_match(tag) {
        return None;
    }
    Some(tag.to_lowercase())
}

struct Tally {
    tag: String,
    frequency: u32,
    posts: Vec<String>,
}

/// Rank hashtags seen on the explore page.
///
/// Ties in frequency keep the order in which tags were first seen.
pub fn collect(
    sightings: &[TagSighting],
    settings: &DiscoverySettings,
    categories: &CategoryTable,
) -> Vec<HashtagObservation> {
    let mut tallies: Vec<Tally> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for sighting in sightings {
        let Some(tag) = normalize_tag(&sighting.tag) else {
            continue;
        };
        let slot = *index.entry(tag.clone()).or_insert_with(|| {
            tallies.push(Tally {
                tag,
                frequency: 0,
                posts: Vec::new(),
            });
            tallies.len() - 1
        });
        let tally = &mut tallies[slot];
        tally.frequency += 1;
        tally.posts.push(sighting.post_id.clone());
    }

    tallies.retain(|t| t.frequency >= settings.min_frequency);
    tallies.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    tallies.truncate(settings.top_n);

    tallies
        .into_iter()
        .map(|t| HashtagObservation {
            category: categories.categorize(&t.tag).to_string(),
            frequency: t.frequency,
            posts_count: t.posts.len(),
            sample_posts: t.posts.into_iter().take(settings.sample_size).collect(),
            hashtag: t.tag,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(min_frequency: u32, top_n: usize, sample_size: usize) -> DiscoverySettings {
        DiscoverySettings {
            scroll_count: 1,
            posts_to_scan: 100,
            min_frequency,
            top_n,
            sample_size,
        }
    }

    fn sightings(pairs: &[(&str, &str)]) -> Vec<TagSighting> {
        pairs.iter().map(|(t, p)| TagSighting::new(*t, *p)).collect()
    }

    #[test]
    fn tag_filter_rejects_short_long_and_numeric() {
        assert_eq!(normalize_tag("#Sunset"), Some("sunset".to_string()));
        assert_eq!(normalize_tag("ok"), None);
        assert_eq!(normalize_tag("2024"), None);
        assert_eq!(normalize_tag("abc"), Some("abc".to_string()));
        assert_eq!(normalize_tag(&"a".repeat(30)), Some("a".repeat(30)));
        assert_eq!(normalize_tag(&"a".repeat(31)), None);
        assert_eq!(normalize_tag("2024vibes"), Some("2024vibes".to_string()));
    }

    #[test]
    fn only_decimal_digit_tags_count_as_numeric() {
        assert_eq!(normalize_tag("\u{0661}\u{0662}\u{0663}"), None);
        assert_eq!(normalize_tag("\u{2160}\u{2161}\u{2162}"), Some("\u{2170}\u{2171}\u{2172}".to_string()));
        assert_eq!(normalize_tag("\u{00bd}\u{00bd}\u{00bd}"), Some("\u{00bd}\u{00bd}\u{00bd}".to_string()));
    }

    #[test]
    fn ranking_is_by_frequency_with_first_seen_tiebreak() {
        let input = sightings(&[
            ("beach", "/p/1/"),
            ("Sunset", "/p/1/"),
            ("travel", "/p/2/"),
            ("sunset", "/p/2/"),
            ("beach", "/p/3/"),
            ("sunset", "/p/3/"),
        ]);

        let ranked = collect(&input, &settings(1, 10, 3), &CategoryTable::builtin());
        let tags: Vec<_> = ranked.iter().map(|o| o.hashtag.as_str()).collect();
        assert_eq!(tags, vec!["sunset", "beach", "travel"]);
        assert_eq!(ranked[0].frequency, 3);
        assert_eq!(ranked[2].category, "travel");
    }

    #[test]
    fn min_frequency_and_top_n_apply_in_order() {
        let input = sightings(&[
            ("alpha", "/p/1/"),
            ("bravo", "/p/1/"),
            ("bravo", "/p/2/"),
            ("charlie", "/p/2/"),
            ("charlie", "/p/3/"),
            ("delta", "/p/3/"),
            ("delta", "/p/4/"),
        ]);

        let ranked = collect(&input, &settings(2, 2, 3), &CategoryTable::builtin());
        let tags: Vec<_> = ranked.iter().map(|o| o.hashtag.as_str()).collect();
        assert_eq!(tags, vec!["bravo", "charlie"]);
    }

    #[test]
    fn samples_are_capped_but_post_count_is_not() {
        let input = sightings(&[
            ("sunset", "/p/1/"),
            ("sunset", "/p/2/"),
            ("sunset", "/p/3/"),
            ("sunset", "/p/4/"),
        ]);

        let ranked = collect(&input, &settings(1, 10, 2), &CategoryTable::builtin());
        assert_eq!(ranked[0].sample_posts, vec!["/p/1/".to_string(), "/p/2/".to_string()]);
        assert_eq!(ranked[0].posts_count, 4);
    }

    #[test]
    fn only_tags_meeting_min_frequency_survive() {
        let input = sightings(&[
            ("sunset", "/p/1/"),
            ("sunrise", "/p/1/"),
            ("sunset", "/p/2/"),
            ("sunset", "/p/3/"),
        ]);

        let ranked = collect(&input, &settings(2, 5, 3), &CategoryTable::builtin());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].hashtag, "sunset");
        assert_eq!(ranked[0].frequency, 3);
    }

    #[test]
    fn excluded_tags_never_count_however_frequent() {
        let mut pairs = Vec::new();
        for i in 0..50 {
            pairs.push(("2024", "/p/n/"));
            pairs.push(("ok", "/p/s/"));
            if i == 0 {
                pairs.push(("sunset", "/p/1/"));
            }
        }
        let long = "x".repeat(31);
        let mut input = sightings(&pairs);
        input.push(TagSighting::new(long.as_str(), "/p/l/"));

        let ranked = collect(&input, &settings(1, 10, 3), &CategoryTable::builtin());
        let tags: Vec<_> = ranked.iter().map(|o| o.hashtag.as_str()).collect();
        assert_eq!(tags, vec!["sunset"]);
    }

    #[test]
    fn nothing_qualifying_yields_empty() {
        let input = sightings(&[("ok", "/p/1/"), ("123", "/p/2/")]);
        assert!(collect(&input, &settings(1, 10, 3), &CategoryTable::builtin()).is_empty());
        assert!(collect(&[], &settings(1, 10, 3), &CategoryTable::builtin()).is_empty());
    }
}
