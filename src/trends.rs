//! Console summary of the current rankings

use anyhow::Result;
use std::path::Path;

use crate::analyze::load_report;
use crate::config::Thresholds;
use crate::types::{GroupStat, RankedPost, Report};
use crate::utils::{format_count, osc8_link};

const TOP_N: usize = 5;

/// Members with enough measured posts for the console view
fn trend_members(report: &Report, min_posts: usize) -> Vec<&GroupStat> {
    report
        .member_stats
        .iter()
        .filter(|m| m.count >= min_posts)
        .collect()
}

fn display_name(post: &RankedPost) -> &str {
    post.member.as_deref().unwrap_or("Unknown")
}

pub fn print_trends(report: &Report, thresholds: &Thresholds) {
    println!(
        "\nAnalyzing {} measured posts of {} total",
        report.summary.measured_posts, report.summary.total_posts
    );
    println!("{}", "=".repeat(60));

    println!("\nTop {} posts by likes", TOP_N);
    for (i, post) in report.top_liked_posts.iter().take(TOP_N).enumerate() {
        println!(
            "{}. {} ({} likes) - {}",
            i + 1,
            display_name(post),
            format_count(post.likes),
            post.author.as_deref().unwrap_or("Unknown")
        );
        println!("   {}", osc8_link(&post.url, &post.url));
    }

    println!(
        "\nAverage likes per member ({}+ posts)",
        thresholds.min_trend_posts
    );
    let members = trend_members(report, thresholds.min_trend_posts);
    if members.is_empty() {
        println!("   (no member has enough measured posts yet)");
    }
    for (rank, m) in members.iter().enumerate() {
        println!(
            "{}. {}: avg {} likes (n={})",
            rank + 1,
            m.name,
            format_count(m.avg_likes),
            m.count
        );
    }

    println!(
        "\nTop {} by engagement rate (likes / views, {}+ views)",
        TOP_N, thresholds.min_impressions
    );
    if report.engagement_ranking.is_empty() {
        println!("   (not enough impression data, skipped)");
    }
    for (i, post) in report.engagement_ranking.iter().take(TOP_N).enumerate() {
        println!(
            "{}. {:.2}% - {} ({} likes / {} views)",
            i + 1,
            post.engagement_rate.unwrap_or(0.0),
            display_name(post),
            format_count(post.likes),
            format_count(post.impressions)
        );
        println!("   {}", osc8_link(&post.url, &post.url));
    }
}

pub fn run_trends(data: &Path, authors: &Path, thresholds: &Thresholds) -> Result<()> {
    if let Some(report) = load_report(data, authors, thresholds)? {
        print_trends(&report, thresholds);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Summary;
    use std::collections::BTreeMap;

    fn stat(name: &str, count: usize) -> GroupStat {
        GroupStat {
            name: name.to_string(),
            count,
            avg_likes: 100,
            max_likes: 200,
        }
    }

    #[test]
    fn test_trend_members_filter() {
        let report = Report {
            generated_at: String::new(),
            summary: Summary {
                total_posts: 10,
                measured_posts: 9,
                total_members: 2,
                total_likes: 900,
            },
            member_ranking: Vec::new(),
            member_stats: vec![stat("A", 6), stat("B", 3)],
            author_stats: Vec::new(),
            source_ratio: BTreeMap::new(),
            timeline: BTreeMap::new(),
            hourly: Vec::new(),
            unknown_hour_posts: 0,
            hashtags: Vec::new(),
            keywords: Vec::new(),
            aspect_ratios: Vec::new(),
            categories: Vec::new(),
            top_liked_posts: Vec::new(),
            viral_ranking: Vec::new(),
            engagement_ranking: Vec::new(),
        };

        let members = trend_members(&report, 5);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "A");
        assert_eq!(trend_members(&report, 3).len(), 2);

        // Printing an almost-empty report must not panic
        print_trends(&report, &Thresholds::default());
    }
}
