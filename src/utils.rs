use std::fs;

/// Create an OSC8 hyperlink for terminal output
pub fn osc8_link(url: &str, text: &str) -> String {
    format!("\x1b]8;;{}\x1b\\{}\x1b]8;;\x1b\\", url, text)
}

/// Create an OSC8 file:// hyperlink for terminal output
pub fn osc8_file_link(path: &str, text: &str) -> String {
    let abs_path = fs::canonicalize(path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string());
    format!("\x1b]8;;file://{}\x1b\\{}\x1b]8;;\x1b\\", abs_path, text)
}

/// Parse a displayed metric like "1.5万", "12.3K", "2M" or "4,021 Likes".
/// Returns 0 for anything unparseable.
pub fn parse_metric(text: &str) -> u64 {
    let cleaned = text
        .replace(',', "")
        .replace("Likes", "")
        .replace("Views", "")
        .replace("Followers", "")
        .trim()
        .to_string();
    if cleaned.is_empty() {
        return 0;
    }

    let scaled = |suffix: &str, factor: f64| -> Option<u64> {
        let number = cleaned.strip_suffix(suffix)?.trim();
        let value: f64 = number.parse().ok()?;
        (value >= 0.0).then(|| (value * factor).round() as u64)
    };

    if cleaned.contains('万') {
        return scaled("万", 10_000.0).unwrap_or(0);
    }
    if let Some(v) = scaled("K", 1_000.0).or_else(|| scaled("k", 1_000.0)) {
        return v;
    }
    if let Some(v) = scaled("M", 1_000_000.0) {
        return v;
    }

    let digits: String = cleaned.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Format an integer with thousands separators (12345 -> "12,345")
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metric() {
        assert_eq!(parse_metric("1.5万"), 15000);
        assert_eq!(parse_metric("12K"), 12000);
        assert_eq!(parse_metric("12.3K"), 12300);
        assert_eq!(parse_metric("2M"), 2_000_000);
        assert_eq!(parse_metric("4,021 Likes"), 4021);
        assert_eq!(parse_metric("987 Views"), 987);
        assert_eq!(parse_metric(""), 0);
        assert_eq!(parse_metric("abc"), 0);
        assert_eq!(parse_metric("x万"), 0);
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(1234567), "1,234,567");
    }
}
