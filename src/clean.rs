//! Drop posts whose first image does not show the tagged member

use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::classify::{api_key_from_env, GeminiClassifier, ImageClassifier, Verdict};
use crate::fetch::{is_http_status, mime_type_for, CachedClient, ImageSource};
use crate::store::{load_records, save_records};
use crate::types::PostRecord;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanStats {
    pub checked: usize,
    pub removed: usize,
    pub errors: usize,
}

/// Check one record. An image the server refuses rejects the record; network and
/// classifier failures keep it.
fn check_record<C, S>(record: &PostRecord, classifier: &C, source: &S, stats: &mut CleanStats) -> bool
where
    C: ImageClassifier,
    S: ImageSource,
{
    let Some(image_url) = record.first_image() else {
        return true;
    };
    let member = record.member_name.as_deref().unwrap_or("Unknown");
    stats.checked += 1;

    let image = match source.fetch_image(image_url) {
        Ok(bytes) => bytes,
        Err(e) if is_http_status(&e) => {
            warn!(url = image_url, error = %format!("{:#}", e), "Image is gone, rejecting");
            return false;
        }
        Err(e) => {
            stats.errors += 1;
            warn!(url = image_url, error = %format!("{:#}", e), "Image fetch failed, keeping post");
            return true;
        }
    };

    match classifier.classify(&image, mime_type_for(image_url), member) {
        Ok(Verdict::Accept) => true,
        Ok(Verdict::Reject) => {
            info!(member, url = %record.url, "Rejected by classifier");
            false
        }
        Err(e) => {
            stats.errors += 1;
            warn!(url = %record.url, error = %format!("{:#}", e), "Classifier error, keeping post");
            true
        }
    }
}

/// Keep records the classifier accepts, waiting `delay` between classifier calls
pub fn clean_records<C, S>(
    records: Vec<PostRecord>,
    classifier: &C,
    source: &S,
    delay: Duration,
    quiet: bool,
) -> Result<(Vec<PostRecord>, CleanStats)>
where
    C: ImageClassifier,
    S: ImageSource,
{
    let total = records.len();
    let mut stats = CleanStats::default();
    let mut kept = Vec::with_capacity(total);

    for (i, record) in records.into_iter().enumerate() {
        if !quiet {
            print!("\r[{}/{}] Checking {}...", i + 1, total, record.url);
            io::stdout().flush()?;
        }

        let had_image = record.first_image().is_some();
        if check_record(&record, classifier, source, &mut stats) {
            kept.push(record);
        } else {
            stats.removed += 1;
        }

        if had_image && !delay.is_zero() && i + 1 < total {
            thread::sleep(delay);
        }
    }
    if !quiet {
        println!();
    }

    Ok((kept, stats))
}

pub fn run_clean(data: &Path, delay_secs: u64, quiet: bool) -> Result<()> {
    let Some(api_key) = api_key_from_env() else {
        warn!("GEMINI_API_KEY or GOOGLE_API_KEY not set; keeping every post");
        return Ok(());
    };
    let Some(records) = load_records(data)? else {
        warn!(path = %data.display(), "Records file not found, nothing to clean");
        return Ok(());
    };

    let backup = data.with_file_name(format!(
        "{}_backup.json",
        data.file_stem().and_then(|s| s.to_str()).unwrap_or("collect")
    ));
    fs::copy(data, &backup)
        .with_context(|| format!("Failed to back up {} to {}", data.display(), backup.display()))?;
    println!("Created backup: {}", backup.display());

    let classifier = GeminiClassifier::new(api_key)?;
    let source = CachedClient::new()?;
    let original = records.len();
    info!(records = original, model = classifier.model(), "Cleaning with image classifier");

    let (kept, stats) = clean_records(
        records,
        &classifier,
        &source,
        Duration::from_secs(delay_secs),
        quiet,
    )?;
    save_records(data, &kept)?;

    println!("{}", "-".repeat(30));
    println!("Cleaning finished!");
    println!("Original : {}", original);
    println!("Removed  : {}", stats.removed);
    println!("Remaining: {}", kept.len());
    if stats.errors > 0 {
        println!("Kept after fetch/classifier errors: {}", stats.errors);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::HttpStatusError;
    use anyhow::bail;
    use std::cell::RefCell;

    /// Accepts images whose first byte is 1, errors on 2, rejects the rest
    struct ByteClassifier {
        labels: RefCell<Vec<String>>,
    }

    impl ImageClassifier for ByteClassifier {
        fn classify(&self, image: &[u8], _mime_type: &str, label: &str) -> Result<Verdict> {
            self.labels.borrow_mut().push(label.to_string());
            match image.first() {
                Some(1) => Ok(Verdict::Accept),
                Some(2) => bail!("quota exceeded"),
                _ => Ok(Verdict::Reject),
            }
        }
    }

    /// Serves the URL's last character as the image byte. "missing" URLs get a 404,
    /// "offline" URLs a transport error.
    struct FakeSource;

    impl ImageSource for FakeSource {
        fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
            if url.contains("missing") {
                return Err(HttpStatusError {
                    url: url.to_string(),
                    status: 404,
                }
                .into());
            }
            if url.contains("offline") {
                bail!("error sending request: connection reset by peer");
            }
            let byte = url.chars().last().and_then(|c| c.to_digit(10)).unwrap_or(0);
            Ok(vec![byte as u8])
        }
    }

    fn rec(url: &str, image: Option<&str>) -> PostRecord {
        PostRecord {
            member_name: Some("花芽すみれ".to_string()),
            url: url.to_string(),
            images: image.map(|i| vec![i.to_string()]).unwrap_or_default(),
            ..PostRecord::default()
        }
    }

    #[test]
    fn test_clean_records_verdicts() {
        let records = vec![
            rec("accept", Some("img/1")),
            rec("reject", Some("img/0")),
            rec("error", Some("img/2")),
            rec("no-image", None),
            rec("unfetchable", Some("img/missing")),
            rec("network-down", Some("img/offline")),
        ];
        let classifier = ByteClassifier {
            labels: RefCell::new(Vec::new()),
        };

        let (kept, stats) =
            clean_records(records, &classifier, &FakeSource, Duration::ZERO, true).unwrap();
        let urls: Vec<&str> = kept.iter().map(|r| r.url.as_str()).collect();

        assert_eq!(urls, vec!["accept", "error", "no-image", "network-down"]);
        assert_eq!(stats.removed, 2);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.checked, 5);
        assert_eq!(classifier.labels.borrow().len(), 3);
        assert!(classifier.labels.borrow().iter().all(|l| l == "花芽すみれ"));
    }

    #[test]
    fn test_clean_records_survives_network_outage() {
        let records = vec![
            rec("a", Some("img/offline/1")),
            rec("b", Some("img/offline/2")),
        ];
        let classifier = ByteClassifier {
            labels: RefCell::new(Vec::new()),
        };

        let (kept, stats) =
            clean_records(records, &classifier, &FakeSource, Duration::ZERO, true).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(stats.removed, 0);
        assert_eq!(stats.errors, 2);
        assert!(classifier.labels.borrow().is_empty());
    }
}
