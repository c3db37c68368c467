//! Reference-image intake. Clients hand us a string (data URL or http URL),
//! an object pointing at a URL, or an object carrying inline base64; all of
//! it funnels through [`normalize`] into the one inline form the upstream
//! model accepts.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use igvertex::RefImage;
use log::trace;
use serde::Deserialize;

const DEFAULT_MIME: &str = "image/png";

#[derive(Debug, thiserror::Error)]
pub enum RefImageError {
    HostNotAllowed,
    SchemeNotAllowed,
    TooLarge,
    FetchFailed(u16),
    FetchError(String),
    BadDataUrl,
    BadBase64,
    DataIsUrl,
    BadUrl,
    Empty,
}

// these tokens land in task error strings after a "REF_IMAGE_INVALID: " prefix
impl std::fmt::Display for RefImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        use RefImageError::*;
        match self {
            HostNotAllowed => write!(f, "REF_IMAGE_HOST_NOT_ALLOWED"),
            SchemeNotAllowed => write!(f, "REF_IMAGE_SCHEME_NOT_ALLOWED"),
            TooLarge => write!(f, "REF_IMAGE_TOO_LARGE"),
            FetchFailed(status) => write!(f, "REF_IMAGE_FETCH_FAILED: {status}"),
            FetchError(msg) => write!(f, "REF_IMAGE_FETCH_FAILED: {msg}"),
            BadDataUrl => write!(f, "REF_IMAGE_BAD_DATA_URL"),
            BadBase64 => write!(f, "REF_IMAGE_BAD_BASE64"),
            DataIsUrl => write!(f, "REF_IMAGE_DATA_IS_URL"),
            BadUrl => write!(f, "REF_IMAGE_BAD_URL"),
            Empty => write!(f, "REF_IMAGE_EMPTY"),
        }
    }
}

/// One entry of the request's `images` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RefInput {
    Url(String),
    Object {
        #[serde(default)]
        uri: Option<String>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        href: Option<String>,
        #[serde(default)]
        data: Option<String>,
        #[serde(default, rename = "mimeType")]
        mime_type: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Empty means any host goes.
    pub allow_hosts: Vec<String>,
    pub allow_http: bool,
    pub max_bytes: Option<u64>,
}

pub async fn normalize(
    http: &reqwest::Client,
    policy: &FetchPolicy,
    input: &RefInput,
) -> Result<RefImage, RefImageError> {
    match input {
        RefInput::Url(s) => normalize_str(http, policy, s, None).await,
        RefInput::Object {
            uri,
            url,
            href,
            data,
            mime_type,
        } => {
            let mime_override = mime_type.as_deref();
            if let Some(target) = uri.as_deref().or(url.as_deref()).or(href.as_deref()) {
                normalize_str(http, policy, target, mime_override).await
            } else if let Some(data) = data.as_deref() {
                normalize_inline(data, mime_override)
            } else {
                Err(RefImageError::Empty)
            }
        }
    }
}

async fn normalize_str(
    http: &reqwest::Client,
    policy: &FetchPolicy,
    s: &str,
    mime_override: Option<&str>,
) -> Result<RefImage, RefImageError> {
    if s.starts_with("data:") {
        let (mime, data) = parse_data_url(s)?;
        return Ok(RefImage {
            mime_type: mime_override.unwrap_or(&mime).to_string(),
            data_base64: data,
        });
    }
    if s.starts_with("http://") || s.starts_with("https://") {
        return fetch_url(http, policy, s, mime_override).await;
    }
    Err(RefImageError::BadUrl)
}

fn normalize_inline(data: &str, mime_override: Option<&str>) -> Result<RefImage, RefImageError> {
    let data = data.trim();
    // a url smuggled into the inline field is a client bug, not a fetch request
    if data.starts_with("http://") || data.starts_with("https://") {
        return Err(RefImageError::DataIsUrl);
    }
    if data.starts_with("data:") {
        let (mime, payload) = parse_data_url(data)?;
        return Ok(RefImage {
            mime_type: mime_override.unwrap_or(&mime).to_string(),
            data_base64: payload,
        });
    }
    if !is_base64(data) {
        return Err(RefImageError::BadBase64);
    }
    Ok(RefImage {
        mime_type: mime_override.unwrap_or(DEFAULT_MIME).to_string(),
        data_base64: data.to_string(),
    })
}

/// `data:image/png;base64,AAAA` → (`image/png`, `AAAA`).
pub fn parse_data_url(s: &str) -> Result<(String, String), RefImageError> {
    let rest = s.strip_prefix("data:").ok_or(RefImageError::BadDataUrl)?;
    let (meta, payload) = rest.split_once(',').ok_or(RefImageError::BadDataUrl)?;
    if !meta.contains("base64") {
        return Err(RefImageError::BadDataUrl);
    }
    let mime = meta.split(';').next().unwrap_or("").trim();
    let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if !is_base64(&payload) {
        return Err(RefImageError::BadBase64);
    }
    Ok((mime.to_string(), payload))
}

fn is_base64(s: &str) -> bool {
    !s.is_empty() && decode_base64(s).is_some()
}

/// Lenient decode, clients pad inconsistently.
pub fn decode_base64(s: &str) -> Option<Vec<u8>> {
    STANDARD
        .decode(s)
        .or_else(|_| STANDARD_NO_PAD.decode(s))
        .ok()
}

/// Scheme and host policy, checked before any bytes move.
pub fn check_url(policy: &FetchPolicy, url: &reqwest::Url) -> Result<(), RefImageError> {
    match url.scheme() {
        "https" => {}
        "http" if policy.allow_http => {}
        _ => return Err(RefImageError::SchemeNotAllowed),
    }
    if policy.allow_hosts.is_empty() {
        return Ok(());
    }
    let host = url.host_str().ok_or(RefImageError::BadUrl)?;
    if policy
        .allow_hosts
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(host))
    {
        Ok(())
    } else {
        Err(RefImageError::HostNotAllowed)
    }
}

async fn fetch_url(
    http: &reqwest::Client,
    policy: &FetchPolicy,
    raw: &str,
    mime_override: Option<&str>,
) -> Result<RefImage, RefImageError> {
    let url = reqwest::Url::parse(raw).map_err(|_| RefImageError::BadUrl)?;
    check_url(policy, &url)?;

    trace!("fetching reference image {url}");
    let res = http
        .get(url)
        .send()
        .await
        .map_err(|e| RefImageError::FetchError(e.to_string()))?;
    if !res.status().is_success() {
        return Err(RefImageError::FetchFailed(res.status().as_u16()));
    }

    let mime = mime_override
        .map(str::to_string)
        .or_else(|| {
            res.headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
                .filter(|v| !v.is_empty())
        })
        .unwrap_or_else(|| DEFAULT_MIME.to_string());

    // stream so an oversized body is cut off mid-flight, not after
    let mut res = res;
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = res
        .chunk()
        .await
        .map_err(|e| RefImageError::FetchError(e.to_string()))?
    {
        if let Some(max) = policy.max_bytes {
            if (buf.len() + chunk.len()) as u64 > max {
                return Err(RefImageError::TooLarge);
            }
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(RefImage {
        mime_type: mime,
        data_base64: STANDARD.encode(&buf),
    })
}
