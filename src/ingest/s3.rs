//! S3 Artifact Source
//!
//! Fetches playlist objects from an S3-compatible bucket. The object key
//! is the last path segment of the notified URL.

use std::sync::{Arc, RwLock};
use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;

use super::ArtifactSource;
use crate::config::SourceConfig;
use crate::error::{Error, Result};

/// Error codes that a fresh set of credentials can fix
const EXPIRED_CODES: &[&str] = &["ExpiredToken", "TokenRefreshRequired", "RequestExpired"];

/// Extract the object key from a locator
pub fn object_key(locator: &str) -> Result<String> {
    let trimmed = locator.trim();
    let without_query = trimmed
        .split(|c: char| c == '?' || c == '#')
        .next()
        .unwrap_or_default();

    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or_default(),
        None => without_query,
    };

    match path.rsplit('/').next() {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(Error::InvalidLocator(locator.to_string())),
    }
}

/// Map a non-success response to an error
fn classify(status: u16, body: &[u8]) -> Result<()> {
    if (200..300).contains(&status) {
        return Ok(());
    }

    let body = String::from_utf8_lossy(body);
    let code = error_code(&body).unwrap_or("Unknown");
    if EXPIRED_CODES.iter().any(|expired| *expired == code) {
        return Err(Error::ExpiredCredential(code.to_string()));
    }
    Err(Error::Source(format!("HTTP {} ({})", status, code)))
}

/// `<Code>` element of an S3 XML error body
fn error_code(body: &str) -> Option<&str> {
    let start = body.find("<Code>")? + "<Code>".len();
    let end = body[start..].find("</Code>")? + start;
    Some(body[start..end].trim())
}

/// Object store source backed by rust-s3
pub struct S3ArtifactSource {
    config: SourceConfig,
    bucket: RwLock<Arc<Bucket>>,
}

impl S3ArtifactSource {
    /// Connect using credentials from the environment or profile
    pub fn new(config: SourceConfig) -> Result<Self> {
        let bucket = open_bucket(&config)?;
        tracing::info!("Using bucket {} in {}", config.bucket, config.region);
        Ok(Self {
            config,
            bucket: RwLock::new(bucket),
        })
    }

    fn bucket(&self) -> Result<Arc<Bucket>> {
        self.bucket
            .read()
            .map(|bucket| Arc::clone(&bucket))
            .map_err(|_| Error::Internal("bucket handle poisoned".into()))
    }
}

fn open_bucket(config: &SourceConfig) -> Result<Arc<Bucket>> {
    let region = match &config.endpoint {
        Some(endpoint) => Region::Custom {
            region: config.region.clone(),
            endpoint: endpoint.clone(),
        },
        None => config
            .region
            .parse::<Region>()
            .map_err(|e| Error::Config(format!("Invalid region {}: {}", config.region, e)))?,
    };

    let credentials = Credentials::default()
        .map_err(|e| Error::Source(format!("Failed to load credentials: {}", e)))?;

    let bucket = Bucket::new(&config.bucket, region, credentials)
        .map_err(|e| Error::Source(e.to_string()))?;
    let bucket = if config.path_style {
        bucket.with_path_style()
    } else {
        bucket
    };
    Ok(Arc::from(bucket))
}

#[async_trait]
impl ArtifactSource for S3ArtifactSource {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        let key = object_key(locator)?;
        tracing::debug!("Fetching {} from bucket {}", key, self.config.bucket);

        let bucket = self.bucket()?;
        let response = match bucket.get_object(&key).await {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                return match EXPIRED_CODES.iter().find(|code| message.contains(*code)) {
                    Some(code) => Err(Error::ExpiredCredential(code.to_string())),
                    None => Err(Error::Source(message)),
                };
            }
        };

        classify(response.status_code(), response.as_slice())?;
        Ok(response.as_slice().to_vec())
    }

    async fn refresh_credentials(&self) -> Result<()> {
        tracing::info!("Refreshing credentials for bucket {}", self.config.bucket);
        let fresh = open_bucket(&self.config)?;
        let mut bucket = self
            .bucket
            .write()
            .map_err(|_| Error::Internal("bucket handle poisoned".into()))?;
        *bucket = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_from_url() {
        assert_eq!(
            object_key("https://streams.s3.amazonaws.com/live/index.m3u8").unwrap(),
            "index.m3u8"
        );
        assert_eq!(object_key("s3://streams/channel-1.m3u8?versionId=3").unwrap(), "channel-1.m3u8");
        assert_eq!(object_key("index.m3u8").unwrap(), "index.m3u8");
    }

    #[test]
    fn test_object_key_rejects_missing_segment() {
        assert!(matches!(object_key("https://streams.example.com"), Err(Error::InvalidLocator(_))));
        assert!(matches!(object_key("https://streams.example.com/live/"), Err(Error::InvalidLocator(_))));
        assert!(matches!(object_key("  "), Err(Error::InvalidLocator(_))));
    }

    #[test]
    fn test_classify_responses() {
        assert!(classify(200, b"#EXTM3U").is_ok());

        let expired = b"<Error><Code>ExpiredToken</Code><Message>expired</Message></Error>";
        assert!(matches!(classify(400, expired), Err(Error::ExpiredCredential(_))));

        let missing = b"<Error><Code>NoSuchKey</Code></Error>";
        match classify(404, missing) {
            Err(Error::Source(msg)) => assert!(msg.contains("NoSuchKey")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
