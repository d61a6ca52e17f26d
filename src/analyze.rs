//! Aggregation of post records into the ranking report

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{info, warn};

use crate::config::Thresholds;
use crate::derive::{AuthorTable, DerivedPost, PostDeriver};
use crate::store::{load_authors, load_records, write_json_file};
use crate::types::{
    AspectBucket, Category, CountEntry, GroupStat, HourBucket, PostRecord, RankedPost, Report,
    Summary, TagStat,
};
use crate::utils::osc8_file_link;

const ASPECT_BUCKETS: [AspectBucket; 4] = [
    AspectBucket::Portrait,
    AspectBucket::Square,
    AspectBucket::Landscape,
    AspectBucket::Unknown,
];
const CATEGORIES: [Category; 3] = [Category::Event, Category::Studio, Category::Other];

/// Running like totals for one group
#[derive(Debug, Clone, Default)]
struct LikeStats {
    count: usize,
    total: u64,
    max: u64,
}

impl LikeStats {
    fn add(&mut self, likes: u64) {
        self.count += 1;
        self.total += likes;
        self.max = self.max.max(likes);
    }

    /// round(total / count), 0 for an empty group
    fn avg(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            (self.total as f64 / self.count as f64).round() as u64
        }
    }
}

fn group_stats<F>(posts: &[DerivedPost], key: F, min_posts: usize) -> Vec<GroupStat>
where
    F: Fn(&DerivedPost) -> Option<String>,
{
    let mut groups: BTreeMap<String, LikeStats> = BTreeMap::new();
    for post in posts {
        if let Some(name) = key(post) {
            groups.entry(name).or_default().add(post.likes());
        }
    }

    let mut stats: Vec<GroupStat> = groups
        .into_iter()
        .filter(|(_, s)| s.count >= min_posts)
        .map(|(name, s)| GroupStat {
            name,
            count: s.count,
            avg_likes: s.avg(),
            max_likes: s.max,
        })
        .collect();
    stats.sort_by(|a, b| {
        b.avg_likes
            .cmp(&a.avg_likes)
            .then(b.count.cmp(&a.count))
            .then(a.name.cmp(&b.name))
    });
    stats
}

fn tag_stats<'p, I>(tags: I, min_posts: usize, top: usize) -> Vec<TagStat>
where
    I: Iterator<Item = (&'p str, u64)>,
{
    let mut groups: BTreeMap<&str, LikeStats> = BTreeMap::new();
    for (tag, likes) in tags {
        groups.entry(tag).or_default().add(likes);
    }

    let mut stats: Vec<TagStat> = groups
        .into_iter()
        .filter(|(_, s)| s.count >= min_posts)
        .map(|(tag, s)| TagStat {
            tag: tag.to_string(),
            count: s.count,
            avg_likes: s.avg(),
        })
        .collect();
    stats.sort_by(|a, b| {
        b.avg_likes
            .cmp(&a.avg_likes)
            .then(b.count.cmp(&a.count))
            .then(a.tag.cmp(&b.tag))
    });
    stats.truncate(top);
    stats
}

fn ranked_post(post: &DerivedPost) -> RankedPost {
    RankedPost {
        member: post.record.member_name.clone(),
        author: post
            .username
            .clone()
            .or_else(|| post.record.author_name.clone()),
        likes: post.likes(),
        impressions: post.record.impression_count,
        followers: post.followers,
        viral_score: post.viral_score,
        engagement_rate: post.engagement_rate,
        url: post.record.url.clone(),
        image: post.record.first_image().map(str::to_string),
    }
}

/// Sort by a score descending; ties go to more likes, then to the smaller URL
fn rank_posts<'a, 'r: 'a, I, F>(posts: I, score: F, top: usize) -> Vec<RankedPost>
where
    I: Iterator<Item = &'a DerivedPost<'r>>,
    F: Fn(&DerivedPost) -> f64,
{
    let mut posts: Vec<&DerivedPost> = posts.collect();
    posts.sort_by(|a, b| {
        score(*b)
            .total_cmp(&score(*a))
            .then(b.likes().cmp(&a.likes()))
            .then_with(|| a.record.url.cmp(&b.record.url))
    });
    posts.into_iter().take(top).map(ranked_post).collect()
}

fn count_ranking<'a>(names: impl Iterator<Item = &'a str>, top: usize) -> Vec<CountEntry> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for name in names {
        *counts.entry(name).or_default() += 1;
    }
    let mut ranking: Vec<CountEntry> = counts
        .into_iter()
        .map(|(name, count)| CountEntry {
            name: name.to_string(),
            count,
        })
        .collect();
    ranking.sort_by(|a, b| match b.count.cmp(&a.count) {
        Ordering::Equal => a.name.cmp(&b.name),
        other => other,
    });
    ranking.truncate(top);
    ranking
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Build the report bundle. Returns `None` when no record has been measured.
pub fn build_report(
    records: &[PostRecord],
    authors: &AuthorTable,
    thresholds: &Thresholds,
    generated_at: DateTime<Utc>,
) -> Option<Report> {
    let t = thresholds;
    let deriver = PostDeriver::new(t, authors);
    let measured: Vec<DerivedPost> = records
        .iter()
        .filter(|r| r.is_measured())
        .map(|r| deriver.derive(r))
        .collect();
    if measured.is_empty() {
        return None;
    }

    // Count-based breakdowns cover every record, measured or not
    let members: BTreeSet<&str> = records.iter().filter_map(|r| non_empty(&r.member_name)).collect();

    let mut source_ratio: BTreeMap<String, usize> = BTreeMap::new();
    for r in records {
        let source = non_empty(&r.source).unwrap_or("Unknown");
        *source_ratio.entry(source.to_string()).or_default() += 1;
    }

    let mut daily: BTreeMap<String, usize> = BTreeMap::new();
    for r in records {
        if let Some(date) = non_empty(&r.collected_at).and_then(|d| d.split('T').next()) {
            if !date.is_empty() {
                *daily.entry(date.to_string()).or_default() += 1;
            }
        }
    }
    let timeline: BTreeMap<String, usize> = daily.into_iter().rev().take(t.timeline_days).collect();

    let summary = Summary {
        total_posts: records.len(),
        measured_posts: measured.len(),
        total_members: members.len(),
        total_likes: measured.iter().map(|p| p.likes()).sum(),
    };

    let member_ranking = count_ranking(
        measured.iter().filter_map(|p| non_empty(&p.record.member_name)),
        t.member_ranking,
    );
    let member_stats = group_stats(
        &measured,
        |p| non_empty(&p.record.member_name).map(str::to_string),
        t.min_group_posts,
    );
    let author_stats = group_stats(
        &measured,
        |p| p.username.as_ref().map(|u| u.to_lowercase()),
        t.min_group_posts,
    );

    let mut hours = vec![LikeStats::default(); 24];
    let mut unknown_hour_posts = 0;
    for post in &measured {
        match post.hour {
            Some(h) if (h as usize) < hours.len() => hours[h as usize].add(post.likes()),
            _ => unknown_hour_posts += 1,
        }
    }
    let hourly = hours
        .iter()
        .enumerate()
        .map(|(hour, s)| HourBucket {
            hour: hour as u32,
            count: s.count,
            avg_likes: s.avg(),
        })
        .collect();

    let hashtags = tag_stats(
        measured
            .iter()
            .flat_map(|p| p.hashtags.iter().map(move |h| (h.as_str(), p.likes()))),
        t.min_tag_posts,
        t.top_hashtags,
    );
    let keywords = tag_stats(
        measured
            .iter()
            .flat_map(|p| p.keywords.iter().map(move |k| (k.as_str(), p.likes()))),
        t.min_tag_posts,
        t.top_keywords,
    );

    let aspect_ratios = ASPECT_BUCKETS
        .iter()
        .map(|bucket| {
            let mut s = LikeStats::default();
            for post in measured.iter().filter(|p| p.aspect == *bucket) {
                s.add(post.likes());
            }
            TagStat {
                tag: bucket.as_str().to_string(),
                count: s.count,
                avg_likes: s.avg(),
            }
        })
        .collect();
    let categories = CATEGORIES
        .iter()
        .map(|category| {
            let mut s = LikeStats::default();
            for post in measured.iter().filter(|p| p.category == *category) {
                s.add(post.likes());
            }
            TagStat {
                tag: category.as_str().to_string(),
                count: s.count,
                avg_likes: s.avg(),
            }
        })
        .collect();

    let top_liked_posts = rank_posts(measured.iter(), |p| p.likes() as f64, t.top_liked);
    let viral_ranking = rank_posts(measured.iter(), |p| p.viral_score, t.top_viral);
    let engagement_ranking = rank_posts(
        measured.iter().filter(|p| p.engagement_rate.is_some()),
        |p| p.engagement_rate.unwrap_or(0.0),
        t.top_engagement,
    );

    Some(Report {
        generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        summary,
        member_ranking,
        member_stats,
        author_stats,
        source_ratio,
        timeline,
        hourly,
        unknown_hour_posts,
        hashtags,
        keywords,
        aspect_ratios,
        categories,
        top_liked_posts,
        viral_ranking,
        engagement_ranking,
    })
}

/// Load records and authors from disk and build a report, if there is anything to report
pub fn load_report(data: &Path, authors: &Path, thresholds: &Thresholds) -> Result<Option<Report>> {
    let Some(records) = load_records(data)? else {
        warn!(path = %data.display(), "Records file not found, nothing to analyze");
        return Ok(None);
    };

    let authors_table = load_authors(authors)?;
    if authors_table.is_empty() {
        info!(path = %authors.display(), "No author table, using per-record follower counts only");
    }

    info!(records = records.len(), authors = authors_table.len(), "Analyzing posts");
    let report = build_report(&records, &authors_table, thresholds, Utc::now());
    if report.is_none() {
        warn!("No measured posts (like_count > 0) yet; run the metrics fetcher first");
    }
    Ok(report)
}

pub fn run_analyze(data: &Path, authors: &Path, output: &Path, thresholds: &Thresholds) -> Result<()> {
    let Some(report) = load_report(data, authors, thresholds)? else {
        return Ok(());
    };

    write_json_file(output, &report)?;

    let output_str = output.display().to_string();
    println!(
        "Analyzed {} measured posts of {} -> {}",
        report.summary.measured_posts,
        report.summary.total_posts,
        osc8_file_link(&output_str, &output_str)
    );
    Ok(())
}
