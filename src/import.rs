//! Merge a spreadsheet CSV export into the records file

use anyhow::{Context, Result};
use chrono::Local;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

use crate::store::{load_records, save_records};
use crate::types::PostRecord;

/// One usable CSV row: member, cosplayer, image URL, post URL
#[derive(Debug, Clone)]
pub struct CsvRow {
    pub member_name: String,
    pub author_name: String,
    pub image_url: String,
    pub post_url: String,
}

impl CsvRow {
    fn into_record(self, collected_at: &str) -> PostRecord {
        PostRecord {
            member_name: Some(self.member_name),
            content: format!("Cosplayer: {}", self.author_name),
            author_name: Some(self.author_name),
            images: if self.image_url.is_empty() {
                Vec::new()
            } else {
                vec![self.image_url]
            },
            url: self.post_url,
            source: Some("X".to_string()),
            collected_at: Some(collected_at.to_string()),
            ..PostRecord::default()
        }
    }
}

/// Read rows from a CSV with a header line. Rows with fewer than 4 columns are skipped.
pub fn read_csv(path: &Path) -> Result<Vec<CsvRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV: {}", path.display()))?;

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(line = line + 2, error = %e, "Skipping unreadable CSV row");
                continue;
            }
        };
        if record.len() < 4 {
            debug!(line = line + 2, "Skipping short CSV row");
            continue;
        }
        rows.push(CsvRow {
            member_name: record[0].trim().to_string(),
            author_name: record[1].trim().to_string(),
            image_url: record[2].trim().to_string(),
            post_url: record[3].trim().to_string(),
        });
    }
    Ok(rows)
}

/// Append rows whose post URL is new, then sort newest-collected first.
/// Returns the merged list and the number of added records.
pub fn merge_rows(
    mut records: Vec<PostRecord>,
    rows: Vec<CsvRow>,
    collected_at: &str,
) -> (Vec<PostRecord>, usize) {
    let mut existing: HashSet<String> = records.iter().map(|r| r.url.clone()).collect();
    let mut added = 0;

    for row in rows {
        if row.post_url.is_empty() || existing.contains(&row.post_url) {
            continue;
        }
        existing.insert(row.post_url.clone());
        records.push(row.into_record(collected_at));
        added += 1;
    }

    records.sort_by(|a, b| {
        let a_at = a.collected_at.as_deref().unwrap_or("");
        let b_at = b.collected_at.as_deref().unwrap_or("");
        b_at.cmp(a_at)
    });
    (records, added)
}

pub fn run_import(csv_path: &Path, data: &Path) -> Result<()> {
    if !csv_path.exists() {
        warn!(path = %csv_path.display(), "CSV file not found, nothing to import");
        return Ok(());
    }

    let rows = read_csv(csv_path)?;
    // An existing file that fails to parse is left alone rather than replaced
    let records = load_records(data)
        .with_context(|| format!("Not importing into unreadable {}", data.display()))?
        .unwrap_or_default();
    let now = Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
    let (merged, added) = merge_rows(records, rows, &now);

    save_records(data, &merged)?;

    println!("Import complete!");
    println!("New records: {}", added);
    println!("Total records: {}", merged.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_read_csv_skips_short_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vspo_data.csv");
        fs::write(
            &path,
            "member,cosplayer,image,url\n\
             花芽すみれ, layer_a ,https://pbs.twimg.com/a.jpg,https://x.com/layer_a/status/1\n\
             too,short\n\
             花芽なずな,layer_b,,https://x.com/layer_b/status/2\n",
        )
        .unwrap();

        let rows = read_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].author_name, "layer_a");
        assert_eq!(rows[1].image_url, "");
    }

    #[test]
    fn test_merge_rows_dedups_and_sorts() {
        let existing = vec![PostRecord {
            url: "https://x.com/a/status/1".to_string(),
            collected_at: Some("2025-01-01T00:00:00".to_string()),
            ..PostRecord::default()
        }];
        let row = |url: &str| CsvRow {
            member_name: "m".to_string(),
            author_name: "layer".to_string(),
            image_url: String::new(),
            post_url: url.to_string(),
        };
        let rows = vec![
            row("https://x.com/a/status/1"),
            row("https://x.com/a/status/2"),
            row("https://x.com/a/status/2"),
            row(""),
        ];

        let (merged, added) = merge_rows(existing, rows, "2025-02-01T00:00:00");
        assert_eq!(added, 1);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].url, "https://x.com/a/status/2");
        assert_eq!(merged[0].content, "Cosplayer: layer");
        assert_eq!(merged[0].like_count, 0);
        assert!(merged[0].images.is_empty());
        assert_eq!(merged[1].url, "https://x.com/a/status/1");
    }

    #[test]
    fn test_run_import_keeps_unparseable_records_file() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("vspo_data.csv");
        let data = dir.path().join("collect.json");
        fs::write(
            &csv_path,
            "member,cosplayer,image,url\nm,layer,,https://x.com/layer/status/9\n",
        )
        .unwrap();
        fs::write(&data, "[{\"url\": \"u\",").unwrap();

        assert!(run_import(&csv_path, &data).is_err());
        assert_eq!(fs::read_to_string(&data).unwrap(), "[{\"url\": \"u\",");
    }

    #[test]
    fn test_run_import_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("vspo_data.csv");
        let data = dir.path().join("collect.json");
        fs::write(
            &csv_path,
            "member,cosplayer,image,url\nm,layer,,https://x.com/layer/status/9\n",
        )
        .unwrap();
        fs::write(&data, r#"[{"url": "https://x.com/a/status/1", "width": "?"}]"#).unwrap();

        run_import(&csv_path, &data).unwrap();
        let records = load_records(&data).unwrap().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_run_import_missing_csv_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("collect.json");
        run_import(&dir.path().join("missing.csv"), &data).unwrap();
        assert!(!data.exists());
    }
}
