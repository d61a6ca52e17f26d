//! Record image width/height and aspect bucket for posts that lack them

use anyhow::{Context, Result};
use std::io::{self, Cursor, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::config::Thresholds;
use crate::derive::classify_aspect;
use crate::fetch::{CachedClient, ImageSource};
use crate::store::{load_records, save_records};
use crate::types::PostRecord;

/// Read image dimensions from the header without decoding pixels
pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("Failed to read image header")?
        .into_dimensions()
        .context("Unrecognized image format")
}

fn needs_dimensions(record: &PostRecord) -> bool {
    record.first_image().is_some() && record.width.map_or(true, |w| w == 0)
}

/// Fill width/height/aspect_type for up to `limit` records. Returns how many were updated.
pub fn fill_dimensions<S: ImageSource>(
    records: &mut [PostRecord],
    source: &S,
    thresholds: &Thresholds,
    limit: usize,
    quiet: bool,
) -> Result<usize> {
    let mut updated = 0;

    for record in records.iter_mut().filter(|r| needs_dimensions(r)) {
        if updated >= limit {
            break;
        }
        let Some(url) = record.first_image().map(str::to_string) else {
            continue;
        };

        let probed = source
            .fetch_image(&url)
            .and_then(|bytes| probe_dimensions(&bytes));
        let (width, height) = match probed {
            Ok(dims) => dims,
            Err(e) => {
                warn!(url = %url, error = %format!("{:#}", e), "Skipping image");
                continue;
            }
        };

        let bucket = classify_aspect(
            Some(width),
            Some(height),
            thresholds.portrait_below,
            thresholds.landscape_above,
        );
        record.width = Some(width);
        record.height = Some(height);
        record.aspect_type = Some(bucket.as_str().to_string());
        updated += 1;

        if !quiet {
            print!("\r[{}/{}] {} ({}x{})   ", updated, limit, bucket.as_str(), width, height);
            io::stdout().flush()?;
        }
    }
    if !quiet && updated > 0 {
        println!();
    }

    Ok(updated)
}

pub fn run_dimensions(data: &Path, thresholds: &Thresholds, limit: usize, quiet: bool) -> Result<()> {
    let Some(mut records) = load_records(data)? else {
        warn!(path = %data.display(), "Records file not found, nothing to measure");
        return Ok(());
    };

    let pending = records.iter().filter(|r| needs_dimensions(r)).count();
    info!(pending, limit, "Measuring image dimensions");

    let source = CachedClient::new()?;
    let updated = fill_dimensions(&mut records, &source, thresholds, limit, quiet)?;
    if updated > 0 {
        save_records(data, &records)?;
    }

    println!("Done! Measured {} new images ({} still pending).", updated, pending - updated);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        image::DynamicImage::new_rgb8(width, height)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    struct PngSource;

    impl ImageSource for PngSource {
        fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
            match url {
                "tall" => Ok(png_bytes(600, 900)),
                "wide" => Ok(png_bytes(1600, 900)),
                "junk" => Ok(b"not an image".to_vec()),
                _ => bail!("404"),
            }
        }
    }

    fn rec(image: &str) -> PostRecord {
        PostRecord {
            images: vec![image.to_string()],
            ..PostRecord::default()
        }
    }

    #[test]
    fn test_probe_png() {
        assert_eq!(probe_dimensions(&png_bytes(640, 480)).unwrap(), (640, 480));
        assert!(probe_dimensions(b"nope").is_err());
    }

    #[test]
    fn test_fill_dimensions() {
        let mut done = rec("tall");
        done.width = Some(1);
        let mut records = vec![rec("junk"), rec("tall"), done, rec("gone"), rec("wide")];

        let updated =
            fill_dimensions(&mut records, &PngSource, &Thresholds::default(), 10, true).unwrap();
        assert_eq!(updated, 2);
        assert_eq!(records[0].width, None);
        assert_eq!(records[1].width, Some(600));
        assert_eq!(records[1].aspect_type.as_deref(), Some("Portrait"));
        assert_eq!(records[2].width, Some(1));
        assert_eq!(records[4].aspect_type.as_deref(), Some("Landscape"));
    }

    #[test]
    fn test_zero_width_is_measured_again() {
        let mut zero = rec("wide");
        zero.width = Some(0);
        zero.height = Some(0);
        let mut records = vec![zero];

        let updated =
            fill_dimensions(&mut records, &PngSource, &Thresholds::default(), 10, true).unwrap();
        assert_eq!(updated, 1);
        assert_eq!((records[0].width, records[0].height), (Some(1600), Some(900)));
    }

    #[test]
    fn test_fill_dimensions_respects_limit() {
        let mut records = vec![rec("tall"), rec("wide")];
        let updated =
            fill_dimensions(&mut records, &PngSource, &Thresholds::default(), 1, true).unwrap();
        assert_eq!(updated, 1);
        assert!(records[1].width.is_none());
    }
}
