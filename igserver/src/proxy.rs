//! Public download path `/i/<key>`: a long-TTL edge cache in front of the
//! object store. Range requests bypass the cache in both directions; non-OK
//! origin responses pass through verbatim.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use log::{info, warn};
use serde_json::json;

use crate::Ctx;

const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
const EXPOSED_HEADERS: &str = "Content-Length, Content-Range, Accept-Ranges, ETag";

// origin headers worth carrying to the client and into the cache
const PASSTHROUGH_HEADERS: [HeaderName; 7] = [
    header::CONTENT_TYPE,
    header::CACHE_CONTROL,
    header::ETAG,
    header::LAST_MODIFIED,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::CONTENT_DISPOSITION,
];

pub struct CachedObject {
    pub status: u16,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Bytes,
}

pub async fn serve(
    State(ctx): State<Arc<Ctx>>,
    Path(key): Path<String>,
    req_headers: HeaderMap,
) -> Response {
    let origin = req_headers.get(header::ORIGIN).cloned();

    if !key_is_valid(&key) {
        return with_cors(
            (StatusCode::BAD_REQUEST, Json(json!({"error": "bad key"}))).into_response(),
            origin.as_ref(),
        );
    }

    let range = req_headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // query strings never make it into the key, axum's {*key} capture is the
    // path only
    let cache_key = edge_cache_key(&key);

    if range.is_none() {
        if let Some(cached) = ctx.edge_cache.get(&cache_key).await {
            info!("edge hit {cache_key}");
            return with_cors(respond_from(&cached), origin.as_ref());
        }
    }

    let origin_res = match ctx.b2.download(&key, range.as_deref()).await {
        Ok(res) => res,
        Err(e) => {
            warn!("origin fetch for {key} failed: {e}");
            return with_cors(
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": format!("origin fetch failed: {e}")})),
                )
                    .into_response(),
                origin.as_ref(),
            );
        }
    };

    let status = origin_res.status();
    let mut headers: Vec<(HeaderName, HeaderValue)> = PASSTHROUGH_HEADERS
        .iter()
        .filter_map(|name| {
            origin_res
                .headers()
                .get(name)
                .map(|v| (name.clone(), v.clone()))
        })
        .collect();

    let body = match origin_res.bytes().await {
        Ok(body) => body,
        Err(e) => {
            warn!("origin body read for {key} failed: {e}");
            return with_cors(
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "origin read failed"})),
                )
                    .into_response(),
                origin.as_ref(),
            );
        }
    };

    let cacheable = status == reqwest::StatusCode::OK && range.is_none();
    if cacheable {
        set_header(
            &mut headers,
            header::CACHE_CONTROL,
            HeaderValue::from_static(IMMUTABLE_CACHE_CONTROL),
        );
    }

    let object = Arc::new(CachedObject {
        status: status.as_u16(),
        headers,
        body,
    });

    if cacheable {
        info!("edge fill {cache_key} ({} bytes)", object.body.len());
        let cache = ctx.edge_cache.clone();
        let object = object.clone();
        // fill off the request path
        tokio::spawn(async move {
            cache.insert(cache_key, object).await;
        });
    }

    with_cors(respond_from(&object), origin.as_ref())
}

pub async fn preflight(req_headers: HeaderMap) -> Response {
    let mut res = StatusCode::NO_CONTENT.into_response();
    let headers = res.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, HEAD, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Range, Content-Type, Authorization"),
    );
    with_cors(res, req_headers.get(header::ORIGIN))
}

pub fn key_is_valid(key: &str) -> bool {
    !key.is_empty() && !key.contains("..")
}

pub fn edge_cache_key(key: &str) -> String {
    format!("/i/{key}")
}

fn respond_from(object: &CachedObject) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(object.status).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in &object.headers {
        builder = builder.header(name.clone(), value.clone());
    }
    builder.body(Body::from(object.body.clone())).unwrap()
}

fn set_header(headers: &mut Vec<(HeaderName, HeaderValue)>, name: HeaderName, value: HeaderValue) {
    headers.retain(|(n, _)| *n != name);
    headers.push((name, value));
}

fn with_cors(mut res: Response, origin: Option<&HeaderValue>) -> Response {
    let headers = res.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        origin.cloned().unwrap_or(HeaderValue::from_static("*")),
    );
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );
    res
}
