use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{trace, warn};
use reqwest::{Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub mod keys;

const DEFAULT_AUTH_URL: &str = "https://api.backblazeb2.com/b2api/v2/b2_authorize_account";

// tokens are valid for 24h, refresh an hour early so we never hand out one
// that dies mid-upload
const AUTH_TTL: Duration = Duration::from_secs(23 * 60 * 60);
const UPLOAD_URL_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    Reqwest(#[from] reqwest::Error),
    AuthorizeFailed(StatusCode),
    ListBucketsFailed(StatusCode),
    BucketNotFound(String),
    GetUploadUrlFailed(StatusCode),
    UploadFailed(StatusCode),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// the three legs of the native upload protocol each cache differently:
// authorize 23h, bucket id forever, upload url 30min and invalidated once on
// a failed upload. each is a single value so a locked cell is enough, the
// refresh is idempotent and a concurrent double-authorize is harmless
struct Cached<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> Cached<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn fresh(&self) -> Option<T> {
        if Instant::now() < self.expires_at {
            Some(self.value.clone())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub account_id: String,
    pub authorization_token: String,
    pub api_url: String,
    pub download_url: String,
    #[serde(default)]
    pub allowed: Option<AllowedBucket>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedBucket {
    #[serde(default)]
    pub bucket_id: Option<String>,
    #[serde(default)]
    pub bucket_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub upload_url: String,
    pub authorization_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListBucketsResponse {
    buckets: Vec<BucketEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketEntry {
    bucket_id: String,
    bucket_name: String,
}

#[derive(Debug, Serialize)]
pub struct Preflight {
    pub api_url: String,
    pub download_url: String,
    pub bucket_id: String,
    pub upload_url_ok: bool,
}

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    key_id: String,
    app_key: String,
    bucket_name: String,
    auth_url: String,
    auth: Arc<RwLock<Option<Cached<Arc<AuthState>>>>>,
    bucket_id: Arc<RwLock<Option<String>>>,
    upload_target: Arc<RwLock<Option<Cached<Arc<UploadTarget>>>>>,
}

pub struct ClientBuilder {
    key_id: String,
    app_key: String,
    bucket_name: String,
    auth_url: String,
}

impl ClientBuilder {
    pub fn new(
        key_id: impl Into<String>,
        app_key: impl Into<String>,
        bucket_name: impl Into<String>,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            app_key: app_key.into(),
            bucket_name: bucket_name.into(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
        }
    }

    pub fn auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(2))
            .https_only(true)
            .build()?;
        Ok(Client {
            http,
            key_id: self.key_id,
            app_key: self.app_key,
            bucket_name: self.bucket_name,
            auth_url: self.auth_url,
            auth: Arc::new(RwLock::new(None)),
            bucket_id: Arc::new(RwLock::new(None)),
            upload_target: Arc::new(RwLock::new(None)),
        })
    }
}

impl Client {
    pub fn builder(
        key_id: impl Into<String>,
        app_key: impl Into<String>,
        bucket_name: impl Into<String>,
    ) -> ClientBuilder {
        ClientBuilder::new(key_id, app_key, bucket_name)
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    pub async fn authorize(&self) -> Result<Arc<AuthState>, Error> {
        if let Some(auth) = self.auth.read().await.as_ref().and_then(|c| c.fresh()) {
            return Ok(auth);
        }
        trace!("POST {}", self.auth_url);
        let res = self
            .http
            .post(&self.auth_url)
            .basic_auth(&self.key_id, Some(&self.app_key))
            .send()
            .await?;
        if res.status() != StatusCode::OK {
            return Err(Error::AuthorizeFailed(res.status()));
        }
        let state: Arc<AuthState> = Arc::new(res.json().await?);
        *self.auth.write().await = Some(Cached::new(state.clone(), AUTH_TTL));
        Ok(state)
    }

    // prefer the bucket embedded in the authorize response (restricted keys
    // carry it), else list_buckets. never expires for the process lifetime
    pub async fn resolve_bucket_id(&self) -> Result<String, Error> {
        if let Some(id) = self.bucket_id.read().await.clone() {
            return Ok(id);
        }
        let auth = self.authorize().await?;
        let from_allowed = auth.allowed.as_ref().and_then(|a| {
            match (a.bucket_id.as_ref(), a.bucket_name.as_ref()) {
                (Some(id), Some(name)) if *name == self.bucket_name => Some(id.clone()),
                _ => None,
            }
        });
        let id = match from_allowed {
            Some(id) => id,
            None => self.list_bucket_id(&auth).await?,
        };
        *self.bucket_id.write().await = Some(id.clone());
        Ok(id)
    }

    async fn list_bucket_id(&self, auth: &AuthState) -> Result<String, Error> {
        let url = format!("{}/b2api/v2/b2_list_buckets", auth.api_url);
        trace!("POST {url}");
        let res = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, &auth.authorization_token)
            .json(&serde_json::json!({
                "accountId": auth.account_id,
                "bucketName": self.bucket_name,
            }))
            .send()
            .await?;
        if res.status() != StatusCode::OK {
            return Err(Error::ListBucketsFailed(res.status()));
        }
        let listing: ListBucketsResponse = res.json().await?;
        listing
            .buckets
            .into_iter()
            .find(|b| b.bucket_name == self.bucket_name)
            .map(|b| b.bucket_id)
            .ok_or_else(|| Error::BucketNotFound(self.bucket_name.clone()))
    }

    pub async fn get_upload_url(&self) -> Result<Arc<UploadTarget>, Error> {
        if let Some(target) = self
            .upload_target
            .read()
            .await
            .as_ref()
            .and_then(|c| c.fresh())
        {
            return Ok(target);
        }
        let auth = self.authorize().await?;
        let bucket_id = self.resolve_bucket_id().await?;
        let url = format!("{}/b2api/v2/b2_get_upload_url", auth.api_url);
        trace!("POST {url}");
        let res = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, &auth.authorization_token)
            .json(&serde_json::json!({ "bucketId": bucket_id }))
            .send()
            .await?;
        if res.status() != StatusCode::OK {
            return Err(Error::GetUploadUrlFailed(res.status()));
        }
        let target: Arc<UploadTarget> = Arc::new(res.json().await?);
        *self.upload_target.write().await = Some(Cached::new(target.clone(), UPLOAD_URL_TTL));
        Ok(target)
    }

    async fn invalidate_upload_url(&self) {
        *self.upload_target.write().await = None;
    }

    // upload urls go stale server-side before our 30min is up, so any failed
    // attempt invalidates the cached url and retries exactly once with a
    // fresh one. the second failure propagates
    pub async fn upload(
        &self,
        key: &str,
        mime: Option<&str>,
        body: Bytes,
        sha1_hex: &str,
    ) -> Result<(), Error> {
        match self.upload_once(key, mime, body.clone(), sha1_hex).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("upload of {key} failed ({e:?}), refreshing upload url and retrying");
                self.invalidate_upload_url().await;
                self.upload_once(key, mime, body, sha1_hex).await
            }
        }
    }

    async fn upload_once(
        &self,
        key: &str,
        mime: Option<&str>,
        body: Bytes,
        sha1_hex: &str,
    ) -> Result<(), Error> {
        let target = self.get_upload_url().await?;
        trace!("POST {} key={key}", target.upload_url);
        let res = self
            .http
            .post(&target.upload_url)
            .header(header::AUTHORIZATION, &target.authorization_token)
            .header("X-Bz-File-Name", encode_key(key))
            .header(header::CONTENT_TYPE, mime.unwrap_or("b2/x-auto"))
            .header("X-Bz-Content-Sha1", sha1_hex)
            .body(body)
            .send()
            .await?;
        if res.status() != StatusCode::OK {
            return Err(Error::UploadFailed(res.status()));
        }
        Ok(())
    }

    // plain origin fetch for the download proxy. status and headers are the
    // caller's problem, non-OK responses get passed through verbatim
    pub async fn download(&self, key: &str, range: Option<&str>) -> Result<Response, Error> {
        let auth = self.authorize().await?;
        let url = format!(
            "{}/file/{}/{}",
            auth.download_url,
            self.bucket_name,
            encode_key(key)
        );
        trace!("GET {url} range={range:?}");
        let mut req = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, &auth.authorization_token);
        if let Some(range) = range {
            req = req.header(header::RANGE, range);
        }
        Ok(req.send().await?)
    }

    // walks all three legs without uploading anything. the generation plane
    // runs this before spending upstream budget
    pub async fn preflight(&self) -> Result<Preflight, Error> {
        let auth = self.authorize().await?;
        let bucket_id = self.resolve_bucket_id().await?;
        let target = self.get_upload_url().await?;
        Ok(Preflight {
            api_url: auth.api_url.clone(),
            download_url: auth.download_url.clone(),
            bucket_id,
            upload_url_ok: !target.upload_url.is_empty(),
        })
    }
}

// per-segment percent-encoding that preserves `/`, the file name header and
// the download path both want this form
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn sha1_hex(data: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    hex::encode(Sha1::digest(data))
}
