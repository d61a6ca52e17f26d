use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const CACHE_DIR: &str = "cache";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; CosplayRank/1.0)";
const TIMEOUT_SECS: u64 = 10;

/// The server answered, but not with the image. Any other fetch error is transport-level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpStatusError {
    pub url: String,
    pub status: u16,
}

impl fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {} fetching {}", self.status, self.url)
    }
}

impl std::error::Error for HttpStatusError {}

/// Whether a fetch error means the server refused the image
pub fn is_http_status(err: &anyhow::Error) -> bool {
    err.downcast_ref::<HttpStatusError>().is_some()
}

/// Anything that can produce image bytes for a URL
pub trait ImageSource {
    fn fetch_image(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP client that keeps every downloaded image under `cache/`
pub struct CachedClient {
    client: reqwest::blocking::Client,
    cache_dir: PathBuf,
}

impl CachedClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()?;
        let cache_dir = PathBuf::from(CACHE_DIR);
        Ok(Self { client, cache_dir })
    }

    /// Map a URL to `cache/<host>/<path>`, dropping the query string
    fn url_to_cache_path(&self, raw: &str) -> Result<PathBuf> {
        let url = Url::parse(raw).with_context(|| format!("Not a fetchable URL: {}", raw))?;
        let Some(host) = url.host_str() else {
            bail!("URL has no host: {}", raw);
        };

        let mut path = self.cache_dir.join(host);
        let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
        for segment in &segments {
            if *segment == "." || *segment == ".." || segment.contains('\\') {
                bail!("Refusing to cache path segment {:?} of {}", segment, raw);
            }
            if !segment.is_empty() {
                path.push(segment);
            }
        }
        // Directory-style URLs still need a file name
        if segments.last().map_or(true, |s| s.is_empty()) {
            path.push("index");
        }
        Ok(path)
    }

    pub fn fetch_binary(&self, url: &str) -> Result<Vec<u8>> {
        let cache_path = self.url_to_cache_path(url)?;

        if cache_path.exists() {
            return fs::read(&cache_path)
                .with_context(|| format!("Failed to read cache: {:?}", cache_path));
        }

        // Query strings select the image variant on the media hosts, so keep them for the request
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Failed to fetch: {}", url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpStatusError {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let bytes = response
            .bytes()
            .with_context(|| format!("Failed to read response: {}", url))?;

        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&cache_path, &bytes)?;

        Ok(bytes.to_vec())
    }
}

impl ImageSource for CachedClient {
    fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        self.fetch_binary(url)
    }
}

/// Guess an image MIME type from its URL, defaulting to JPEG
pub fn mime_type_for(url: &str) -> &'static str {
    let path = url.split('?').next().unwrap_or(url).to_lowercase();
    // pbs.twimg.com encodes the format as ?format=png
    let query_format = url
        .split_once("format=")
        .map(|(_, rest)| rest.split('&').next().unwrap_or("").to_lowercase());

    match (path.as_str(), query_format.as_deref()) {
        (_, Some("png")) => "image/png",
        (_, Some("webp")) => "image/webp",
        (p, _) if p.ends_with(".png") => "image/png",
        (p, _) if p.ends_with(".gif") => "image/gif",
        (p, _) if p.ends_with(".webp") => "image/webp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_to_cache_path() {
        let client = CachedClient::new().unwrap();
        assert_eq!(
            client
                .url_to_cache_path("https://pbs.twimg.com/media/abc.jpg?name=large")
                .unwrap(),
            PathBuf::from("cache/pbs.twimg.com/media/abc.jpg")
        );
        assert_eq!(
            client.url_to_cache_path("http://example.com/x.png").unwrap(),
            PathBuf::from("cache/example.com/x.png")
        );
    }

    #[test]
    fn test_url_to_cache_path_stays_in_cache() {
        let client = CachedClient::new().unwrap();
        let escaped = client
            .url_to_cache_path("https://cdn.example.com/a/../../../etc/passwd")
            .unwrap();
        assert!(escaped.starts_with("cache/cdn.example.com"));
        assert!(!escaped.components().any(|c| c.as_os_str() == ".."));

        assert_eq!(
            client.url_to_cache_path("https://cdn.example.com/gallery/").unwrap(),
            PathBuf::from("cache/cdn.example.com/gallery/index")
        );
        assert_eq!(
            client.url_to_cache_path("https://cdn.example.com").unwrap(),
            PathBuf::from("cache/cdn.example.com/index")
        );
        assert!(client.url_to_cache_path("../../etc/passwd").is_err());
    }

    #[test]
    fn test_http_status_error_is_recognized() {
        let status: anyhow::Error = HttpStatusError {
            url: "u".to_string(),
            status: 404,
        }
        .into();
        assert!(is_http_status(&status));
        assert!(is_http_status(&status.context("while cleaning")));
        assert!(!is_http_status(&anyhow::anyhow!("connection reset")));
    }

    #[test]
    fn test_mime_type_for() {
        assert_eq!(mime_type_for("https://pbs.twimg.com/media/a?format=png&name=large"), "image/png");
        assert_eq!(mime_type_for("https://pbs.twimg.com/media/a?format=jpg"), "image/jpeg");
        assert_eq!(mime_type_for("https://cdn.example.com/a.WEBP"), "image/webp");
        assert_eq!(mime_type_for("https://cdn.example.com/a.gif"), "image/gif");
        assert_eq!(mime_type_for("https://scontent.cdninstagram.com/v/t51/abc"), "image/jpeg");
    }
}
