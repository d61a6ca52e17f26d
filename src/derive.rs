//! Per-record join and derivation
//!
//! Every field the reports need is computed here exactly once per record,
//! before any report-specific grouping happens.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;
use url::Url;

use crate::config::Thresholds;
use crate::types::{AspectBucket, Category, PostRecord};

/// X (Twitter) snowflake epoch in Unix milliseconds
const X_EPOCH_MS: i64 = 1_288_834_974_657;
/// Instagram media-id epoch in Unix milliseconds
const INSTAGRAM_EPOCH_MS: i64 = 1_314_220_021_721;
const INSTAGRAM_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Username -> follower count lookup
#[derive(Debug, Clone, Default)]
pub struct AuthorTable {
    followers: HashMap<String, u64>,
}

impl AuthorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, username: &str, followers: u64) {
        self.followers.insert(normalize_username(username), followers);
    }

    pub fn followers(&self, username: &str) -> Option<u64> {
        self.followers.get(&normalize_username(username)).copied()
    }

    pub fn len(&self) -> usize {
        self.followers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.followers.is_empty()
    }
}

fn normalize_username(name: &str) -> String {
    name.trim().trim_start_matches('@').to_lowercase()
}

/// A record together with everything derived from it
#[derive(Debug, Clone)]
pub struct DerivedPost<'a> {
    pub record: &'a PostRecord,
    pub username: Option<String>,
    pub followers: u64,
    pub viral_score: f64,
    pub engagement_rate: Option<f64>,
    pub hour: Option<u32>,
    pub aspect: AspectBucket,
    pub hashtags: Vec<String>,
    pub keywords: Vec<String>,
    pub category: Category,
}

impl DerivedPost<'_> {
    pub fn likes(&self) -> u64 {
        self.record.like_count
    }
}

fn is_x_host(host: &str) -> bool {
    matches!(
        host,
        "x.com" | "www.x.com" | "twitter.com" | "www.twitter.com" | "mobile.twitter.com"
    )
}

fn is_instagram_host(host: &str) -> bool {
    matches!(host, "instagram.com" | "www.instagram.com")
}

fn path_segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default()
}

/// Extract the posting account from a post URL
pub fn username_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    let segments = path_segments(&url);

    if is_x_host(host) {
        // /<user>/status/<id>; "/i/status/<id>" carries no username
        match segments.as_slice() {
            [user, "status", ..] if *user != "i" => Some(user.to_string()),
            _ => None,
        }
    } else if is_instagram_host(host) {
        // /<user>/p/<code>/; the bare /p/<code>/ form carries no username
        match segments.as_slice() {
            [user, "p" | "reel", ..] => Some(user.to_string()),
            _ => None,
        }
    } else {
        None
    }
}

/// Decode an X status id into its creation time (Unix ms)
pub fn snowflake_to_millis(id: u64) -> Option<i64> {
    let offset = (id >> 22) as i64;
    (offset > 0).then_some(offset + X_EPOCH_MS)
}

/// Decode an Instagram shortcode into its creation time (Unix ms)
pub fn shortcode_to_millis(code: &str) -> Option<i64> {
    // Codes longer than 11 characters carry a private suffix after the media id
    let code: String = code.chars().take(11).collect();
    if code.is_empty() {
        return None;
    }
    let mut media_id: u64 = 0;
    for c in code.chars() {
        let digit = INSTAGRAM_ALPHABET.find(c)? as u64;
        media_id = media_id.checked_mul(64)?.checked_add(digit)?;
    }
    let offset = (media_id >> 23) as i64;
    (offset > 0).then_some(offset + INSTAGRAM_EPOCH_MS)
}

/// Creation time encoded in a post URL's id, if the platform encodes one
pub fn millis_from_url(raw: &str) -> Option<i64> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    let segments = path_segments(&url);

    if is_x_host(host) {
        let pos = segments.iter().position(|s| *s == "status")?;
        let id: u64 = segments.get(pos + 1)?.parse().ok()?;
        snowflake_to_millis(id)
    } else if is_instagram_host(host) {
        let pos = segments
            .iter()
            .position(|s| matches!(*s, "p" | "reel" | "tv"))?;
        shortcode_to_millis(segments.get(pos + 1)?)
    } else {
        None
    }
}

/// Hour of day a post was published, in the given offset
pub fn posting_hour(record: &PostRecord, offset: FixedOffset) -> Option<u32> {
    if let Some(ms) = millis_from_url(&record.url) {
        if let Some(dt) = DateTime::from_timestamp_millis(ms) {
            return Some(dt.with_timezone(&offset).hour());
        }
    }

    let raw = record.posted_at.as_deref()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&offset).hour());
    }
    // Naive timestamps are written by the scrapers in local time already
    match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => Some(naive.hour()),
        Err(e) => {
            debug!(url = %record.url, posted_at = raw, error = %e, "Unparseable posting time");
            None
        }
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// likes / followers, rounded to 3 places; 0 at or below the follower threshold
pub fn viral_score(likes: u64, followers: u64, min_followers: u64) -> f64 {
    if followers > min_followers && followers > 0 {
        round_to(likes as f64 / followers as f64, 3)
    } else {
        0.0
    }
}

/// likes / impressions as a percentage, rounded to 2 places
pub fn engagement_rate(likes: u64, impressions: u64, min_impressions: u64) -> Option<f64> {
    (impressions > min_impressions && impressions > 0)
        .then(|| round_to(likes as f64 / impressions as f64 * 100.0, 2))
}

/// Bucket an image by width/height ratio
pub fn classify_aspect(
    width: Option<u32>,
    height: Option<u32>,
    portrait_below: f64,
    landscape_above: f64,
) -> AspectBucket {
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => {
            let ratio = w as f64 / h as f64;
            if ratio < portrait_below {
                AspectBucket::Portrait
            } else if ratio > landscape_above {
                AspectBucket::Landscape
            } else {
                AspectBucket::Square
            }
        }
        _ => AspectBucket::Unknown,
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
}

/// Joins records with the author table and derives report fields
pub struct PostDeriver<'t> {
    thresholds: &'t Thresholds,
    authors: &'t AuthorTable,
    offset: FixedOffset,
    hashtag_re: Regex,
}

impl<'t> PostDeriver<'t> {
    pub fn new(thresholds: &'t Thresholds, authors: &'t AuthorTable) -> Self {
        Self {
            thresholds,
            authors,
            offset: thresholds.utc_offset(),
            hashtag_re: Regex::new(r"[#＃](\w+)").expect("hashtag pattern is valid"),
        }
    }

    /// Lowercased, de-duplicated hashtags in order of first appearance
    pub fn hashtags(&self, content: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.hashtag_re
            .captures_iter(content)
            .map(|c| c[1].to_lowercase())
            .filter(|tag| seen.insert(tag.clone()))
            .collect()
    }

    pub fn keywords(&self, content: &str) -> Vec<String> {
        let lower = content.to_lowercase();
        self.thresholds
            .tracked_keywords
            .iter()
            .filter(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
            .cloned()
            .collect()
    }

    pub fn category(&self, content: &str) -> Category {
        let lower = content.to_lowercase();
        if contains_any(&lower, &self.thresholds.event_keywords) {
            Category::Event
        } else if contains_any(&lower, &self.thresholds.studio_keywords) {
            Category::Studio
        } else {
            Category::Other
        }
    }

    pub fn derive<'a>(&self, record: &'a PostRecord) -> DerivedPost<'a> {
        let t = self.thresholds;

        let username = username_from_url(&record.url).or_else(|| {
            record
                .author_name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        });

        let followers = record
            .follower_count
            .filter(|&n| n > 0)
            .or_else(|| username.as_deref().and_then(|u| self.authors.followers(u)))
            .unwrap_or(0);

        let aspect = match classify_aspect(
            record.width,
            record.height,
            t.portrait_below,
            t.landscape_above,
        ) {
            AspectBucket::Unknown => record
                .aspect_type
                .as_deref()
                .map(AspectBucket::from_label)
                .unwrap_or(AspectBucket::Unknown),
            bucket => bucket,
        };

        DerivedPost {
            record,
            followers,
            viral_score: viral_score(record.like_count, followers, t.min_followers),
            engagement_rate: engagement_rate(
                record.like_count,
                record.impression_count,
                t.min_impressions,
            ),
            hour: posting_hour(record, self.offset),
            aspect,
            hashtags: self.hashtags(&record.content),
            keywords: self.keywords(&record.content),
            category: self.category(&record.content),
            username,
        }
    }
}
