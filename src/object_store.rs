//! Document object storage.
//!
//! Indexing never reads storage directly: it asks an [`ObjectStore`] for a
//! time-limited URL to the object and downloads that URL.
//!
//! | Backend | URL form | Credentials |
//! |---------|----------|-------------|
//! | [`S3ObjectStore`] | SigV4 query-presigned `https://` | `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` |
//! | [`LocalObjectStore`] | `file://` under a root directory | none |
//!
//! Presigning is done locally with HMAC-SHA256 (no AWS SDK); custom
//! endpoints (MinIO, LocalStack) use path-style URLs.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;
use crate::error::RagError;

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Time-limited URL for `object_name`, valid for `expires_secs`.
    async fn presigned_url(&self, object_name: &str, expires_secs: u64) -> Result<String>;
    /// Download the bytes behind a URL produced by [`presigned_url`](ObjectStore::presigned_url).
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub fn create_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend.as_str() {
        "local" => {
            let root = config
                .root
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            Ok(Arc::new(LocalObjectStore::new(root)))
        }
        "s3" => Ok(Arc::new(S3ObjectStore::from_env(config)?)),
        other => bail!("Unknown storage backend: {}", other),
    }
}

// ============ Local ============

/// Objects are files under `root`; object names are relative paths.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn presigned_url(&self, object_name: &str, _expires_secs: u64) -> Result<String> {
        let relative = Path::new(object_name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if object_name.is_empty() || escapes {
            return Err(RagError::PresignedUrl(object_name.to_string()).into());
        }
        let root = std::fs::canonicalize(&self.root)
            .with_context(|| format!("Storage root not found: {}", self.root.display()))?;
        Ok(format!("file://{}", root.join(relative).display()))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| anyhow::anyhow!("Local storage cannot fetch {}", url))?;
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RagError::load(path, format!("File not found: {}", path)).into())
            }
            Err(e) => Err(RagError::load(path, e).into()),
        }
    }
}

// ============ S3 ============

/// AWS credentials loaded from the environment.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3ObjectStore {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3ObjectStore {
    pub fn new(config: &StorageConfig, creds: AwsCredentials) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| anyhow::anyhow!("storage.bucket is required for the s3 backend"))?;
        Ok(Self {
            bucket,
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            creds,
            client: reqwest::Client::new(),
        })
    }

    pub fn from_env(config: &StorageConfig) -> Result<Self> {
        Self::new(config, AwsCredentials::from_env()?)
    }

    /// `(scheme, host, canonical uri)` for an object key.
    fn locate(&self, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match &self.endpoint_url {
            Some(endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                (
                    scheme.to_string(),
                    host,
                    format!("/{}/{}", uri_encode(&self.bucket), encoded_key),
                )
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                format!("/{}", encoded_key),
            ),
        }
    }

    pub fn presign_at(&self, key: &str, expires_secs: u64, now: DateTime<Utc>) -> String {
        let (scheme, host, canonical_uri) = self.locate(key);
        let query = presign_query(
            &self.creds,
            &self.region,
            &host,
            &canonical_uri,
            expires_secs,
            now,
        );
        format!("{}://{}{}?{}", scheme, host, canonical_uri, query)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn presigned_url(&self, object_name: &str, expires_secs: u64) -> Result<String> {
        // SigV4 presigned URLs are valid for at most seven days.
        if object_name.is_empty() || expires_secs == 0 || expires_secs > 604_800 {
            return Err(RagError::PresignedUrl(object_name.to_string()).into());
        }
        Ok(self.presign_at(object_name, expires_secs, Utc::now()))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download from s3://{}", self.bucket))?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("S3 GetObject failed (HTTP {}) in bucket '{}'", status, self.bucket);
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

// ============ AWS SigV4 Helpers ============

/// Build the signed query string for a presigned `GET`.
fn presign_query(
    creds: &AwsCredentials,
    region: &str,
    host: &str,
    canonical_uri: &str,
    expires_secs: u64,
    now: DateTime<Utc>,
) -> String {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);

    let mut params = vec![
        ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
        (
            "X-Amz-Credential".to_string(),
            format!("{}/{}", creds.access_key_id, credential_scope),
        ),
        ("X-Amz-Date".to_string(), amz_date.clone()),
        ("X-Amz-Expires".to_string(), expires_secs.to_string()),
        ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
    ];
    if let Some(ref token) = creds.session_token {
        params.push(("X-Amz-Security-Token".to_string(), token.clone()));
    }
    params.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_query = params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_request = format!(
        "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
        canonical_uri, canonical_query, host
    );

    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!("{}&X-Amz-Signature={}", canonical_query, signature)
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// AWS SigV4 signing key: `HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")`.
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per AWS rules: unreserved characters pass through.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn s3(endpoint: Option<&str>, token: Option<&str>) -> S3ObjectStore {
        let config = StorageConfig {
            backend: "s3".to_string(),
            bucket: Some("docs".to_string()),
            region: "ap-southeast-1".to_string(),
            endpoint_url: endpoint.map(|s| s.to_string()),
            ..Default::default()
        };
        S3ObjectStore::new(
            &config,
            AwsCredentials {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: token.map(|s| s.to_string()),
            },
        )
        .unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 23, 8, 30, 0).unwrap()
    }

    #[test]
    fn presigned_url_has_sigv4_query() {
        let url = s3(None, None).presign_at("reports/Q3 loans.csv", 28800, at());
        assert!(url.starts_with(
            "https://docs.s3.ap-southeast-1.amazonaws.com/reports/Q3%20loans.csv?X-Amz-Algorithm=AWS4-HMAC-SHA256"
        ));
        assert!(url.contains(
            "X-Amz-Credential=AKIDEXAMPLE%2F20240923%2Fap-southeast-1%2Fs3%2Faws4_request"
        ));
        assert!(url.contains("X-Amz-Date=20240923T083000Z"));
        assert!(url.contains("X-Amz-Expires=28800"));
        let sig = url.rsplit("X-Amz-Signature=").next().unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn presigning_is_deterministic_and_key_sensitive() {
        let store = s3(None, None);
        assert_eq!(
            store.presign_at("a.csv", 60, at()),
            store.presign_at("a.csv", 60, at())
        );
        assert_ne!(
            store.presign_at("a.csv", 60, at()),
            store.presign_at("b.csv", 60, at())
        );
    }

    #[test]
    fn custom_endpoint_is_path_style() {
        let url = s3(Some("http://localhost:9000/"), Some("tok/en")).presign_at("a.txt", 60, at());
        assert!(url.starts_with("http://localhost:9000/docs/a.txt?"));
        assert!(url.contains("X-Amz-Security-Token=tok%2Fen"));
    }

    #[tokio::test]
    async fn s3_rejects_bad_expiry() {
        let err = s3(None, None).presigned_url("a.txt", 0).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::PresignedUrl(o)) if o == "a.txt"
        ));
    }

    #[test]
    fn uri_encoding() {
        assert_eq!(uri_encode("a b/c~d"), "a%20b%2Fc~d");
    }

    #[tokio::test]
    async fn local_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/faq.txt"), b"hello").unwrap();

        let store = LocalObjectStore::new(dir.path());
        let url = store.presigned_url("docs/faq.txt", 60).await.unwrap();
        assert!(url.starts_with("file://"));
        assert_eq!(store.fetch(&url).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn local_missing_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let url = store.presigned_url("missing.txt", 60).await.unwrap();
        let err = store.fetch(&url).await.unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn local_rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(store.presigned_url("../etc/passwd", 60).await.is_err());
        assert!(store.presigned_url("/etc/passwd", 60).await.is_err());
    }
}
