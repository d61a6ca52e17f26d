//! Post records and report bundle types with JSON serialization support

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::utils::parse_metric;

/// Aspect-ratio bucket of a post's first image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AspectBucket {
    Portrait,
    Square,
    Landscape,
    Unknown,
}

impl AspectBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectBucket::Portrait => "Portrait",
            AspectBucket::Square => "Square",
            AspectBucket::Landscape => "Landscape",
            AspectBucket::Unknown => "Unknown",
        }
    }

    /// Parse a stored `aspect_type` label such as "Portrait (縦長)"
    pub fn from_label(s: &str) -> Self {
        let lower = s.trim().to_lowercase();
        if lower.starts_with("portrait") {
            AspectBucket::Portrait
        } else if lower.starts_with("square") {
            AspectBucket::Square
        } else if lower.starts_with("landscape") {
            AspectBucket::Landscape
        } else {
            AspectBucket::Unknown
        }
    }
}

/// Content category, decided by keyword membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Event,
    Studio,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Event => "event",
            Category::Studio => "studio",
            Category::Other => "other",
        }
    }
}

/// Accept counts written as numbers, display strings ("1.5万"), or null
fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(count_from_value(&value))
}

/// Like `lenient_count`, but remembers whether the field was present at all
fn lenient_opt_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok((!value.is_null()).then(|| count_from_value(&value)))
}

/// Convert a loosely-typed JSON count to an integer, defaulting to 0
pub fn count_from_value(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => parse_metric(s),
        _ => 0,
    }
}

/// Pixel dimension from an integer (or integral float); anything else is unknown
fn lenient_dimension<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Number(n) = value else {
        return Ok(None);
    };
    let dim = n.as_u64().or_else(|| {
        n.as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
    });
    Ok(dim.and_then(|d| u32::try_from(d).ok()))
}

/// Strings pass through; null and other types read as empty
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_string(deserializer)?.unwrap_or_default())
}

/// Strings pass through; null and other types read as absent
fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

/// A list of image URLs; a bare string counts as a one-element list
fn lenient_images<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Value::String(s) if !s.is_empty() => vec![s],
        _ => Vec::new(),
    })
}

/// One scraped post, as stored in the shared records file.
///
/// Fields this tool does not know about are kept in `extra` so that jobs
/// rewriting the file never drop data written by the scrapers. Known fields
/// of the wrong type read as their empty value instead of failing the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostRecord {
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub member_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub member_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub author_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_images")]
    pub images: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub source: Option<String>,

    #[serde(default, deserialize_with = "lenient_count")]
    pub like_count: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub impression_count: u64,
    #[serde(
        default,
        deserialize_with = "lenient_opt_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub follower_count: Option<u64>,

    #[serde(
        default,
        deserialize_with = "lenient_dimension",
        skip_serializing_if = "Option::is_none"
    )]
    pub width: Option<u32>,
    #[serde(
        default,
        deserialize_with = "lenient_dimension",
        skip_serializing_if = "Option::is_none"
    )]
    pub height: Option<u32>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub aspect_type: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub posted_at: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub collected_at: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PostRecord {
    /// A post with zero likes has not been measured yet
    pub fn is_measured(&self) -> bool {
        self.like_count > 0
    }

    pub fn first_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str).filter(|s| !s.is_empty())
    }
}

/// Headline totals for a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_posts: usize,
    pub measured_posts: usize,
    pub total_members: usize,
    pub total_likes: u64,
}

/// Like statistics for one member or author
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStat {
    pub name: String,
    pub count: usize,
    pub avg_likes: u64,
    pub max_likes: u64,
}

/// A name with an occurrence count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountEntry {
    pub name: String,
    pub count: usize,
}

/// Average likes for one hour of the day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourBucket {
    pub hour: u32,
    pub count: usize,
    pub avg_likes: u64,
}

/// Average likes for a hashtag, keyword, or classification bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagStat {
    pub tag: String,
    pub count: usize,
    pub avg_likes: u64,
}

/// One post in a ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPost {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub likes: u64,
    pub impressions: u64,
    pub followers: u64,
    pub viral_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engagement_rate: Option<f64>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Complete output of one aggregation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: String,
    pub summary: Summary,
    pub member_ranking: Vec<CountEntry>,
    pub member_stats: Vec<GroupStat>,
    pub author_stats: Vec<GroupStat>,
    pub source_ratio: BTreeMap<String, usize>,
    pub timeline: BTreeMap<String, usize>,
    pub hourly: Vec<HourBucket>,
    pub unknown_hour_posts: usize,
    pub hashtags: Vec<TagStat>,
    pub keywords: Vec<TagStat>,
    pub aspect_ratios: Vec<TagStat>,
    pub categories: Vec<TagStat>,
    pub top_liked_posts: Vec<RankedPost>,
    pub viral_ranking: Vec<RankedPost>,
    pub engagement_ranking: Vec<RankedPost>,
}
