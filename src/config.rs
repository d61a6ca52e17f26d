//! Aggregation thresholds, loaded from an optional CONL file
//!
//! Every key has a default, so a config file only needs the values it
//! changes:
//!
//! ```text
//! min_impressions = 500
//! min_group_posts = 5
//! event_keywords
//!   = コミケ
//!   = acosta
//! ```

use anyhow::{bail, Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    /// Viral score is only computed above this follower count
    pub min_followers: u64,
    /// Engagement rate is only computed above this impression count
    pub min_impressions: u64,
    /// Minimum measured posts for a member/author to be ranked
    pub min_group_posts: usize,
    /// Minimum measured posts for the console trend view
    pub min_trend_posts: usize,
    /// Minimum occurrences for a hashtag or keyword to be ranked
    pub min_tag_posts: usize,

    pub top_liked: usize,
    pub top_viral: usize,
    pub top_engagement: usize,
    pub top_hashtags: usize,
    pub top_keywords: usize,
    pub member_ranking: usize,
    pub timeline_days: usize,

    /// Width/height ratio below which an image is portrait
    pub portrait_below: f64,
    /// Width/height ratio above which an image is landscape
    pub landscape_above: f64,

    /// Offset applied when bucketing posts by hour of day
    pub utc_offset_hours: i32,

    pub tracked_keywords: Vec<String>,
    pub event_keywords: Vec<String>,
    pub studio_keywords: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_followers: 10,
            min_impressions: 1000,
            min_group_posts: 3,
            min_trend_posts: 5,
            min_tag_posts: 3,
            top_liked: 5,
            top_viral: 50,
            top_engagement: 20,
            top_hashtags: 30,
            top_keywords: 20,
            member_ranking: 20,
            timeline_days: 30,
            portrait_below: 0.9,
            landscape_above: 1.1,
            utc_offset_hours: 9,
            tracked_keywords: strings(&[
                "コスプレ",
                "cosplay",
                "ぶいすぽ",
                "vspo",
                "撮影",
                "併せ",
                "衣装",
                "ウィッグ",
                "メイク",
                "自作",
            ]),
            event_keywords: strings(&[
                "イベント",
                "コミケ",
                "コスサミ",
                "ホココス",
                "acosta",
                "アコスタ",
                "ストフォト",
                "event",
            ]),
            studio_keywords: strings(&["スタジオ", "studio", "スタ撮", "ハウスタ"]),
        }
    }
}

impl Thresholds {
    /// Load thresholds from a CONL file, falling back to defaults if it is absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using default thresholds");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let thresholds: Thresholds = serde_conl::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.portrait_below > 0.0 && self.portrait_below <= self.landscape_above) {
            bail!(
                "portrait_below ({}) must be positive and not above landscape_above ({})",
                self.portrait_below,
                self.landscape_above
            );
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            bail!("utc_offset_hours out of range: {}", self.utc_offset_hours);
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let t = Thresholds::load(Path::new("does/not/exist.conl")).unwrap();
        assert_eq!(t.min_group_posts, 3);
        assert_eq!(t.min_impressions, 1000);
        assert_eq!(t.utc_offset().local_minus_utc(), 9 * 3600);
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cosplay.conl");
        fs::write(&path, "min_impressions = 500\nmin_group_posts = 5\n").unwrap();

        let t = Thresholds::load(&path).unwrap();
        assert_eq!(t.min_impressions, 500);
        assert_eq!(t.min_group_posts, 5);
        assert_eq!(t.top_liked, 5);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cosplay.conl");
        fs::write(&path, "min_impresions = 500\n").unwrap();
        assert!(Thresholds::load(&path).is_err());
    }

    #[test]
    fn test_inverted_aspect_bounds_rejected() {
        let t = Thresholds {
            portrait_below: 1.2,
            landscape_above: 1.1,
            ..Thresholds::default()
        };
        assert!(t.validate().is_err());
    }
}
