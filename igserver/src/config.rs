//! Environment-driven configuration, one field per recognized variable.

use igvertex::ServiceAccountKey;

pub const DEFAULT_KEY_PREFIX: &str = "gemini/";
pub const REF_IMAGE_KEY_PREFIX: &str = "cankaotu/";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://gateway.db?mode=rwc";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    Missing(&'static str),
    BadValue(&'static str, String),
    BadServiceAccount(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConfigError::Missing(name) => write!(f, "missing required env var {name}"),
            ConfigError::BadValue(name, v) => write!(f, "bad value for {name}: {v}"),
            ConfigError::BadServiceAccount(msg) => write!(f, "bad service account: {msg}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub b2_key_id: String,
    pub b2_app_key: String,
    pub b2_bucket_name: String,
    /// Public URL base the stored-object links are minted under, always
    /// `https://` with no trailing slash.
    pub img_return_base: String,
    pub vertex_project_ids: Vec<String>,
    pub vertex_location: String,
    pub vertex_model: String,
    pub vertex_endpoint_global: bool,
    pub service_account: ServiceAccountKey,
    pub key_prefix: String,
    pub max_images_per_response: usize,
    /// Empty list means no host filtering at all.
    pub allow_ref_image_hosts: Vec<String>,
    pub allow_ref_image_http: bool,
    /// `None` means unlimited.
    pub max_ref_image_bytes: Option<u64>,
    pub database_url: String,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let service_account = match env_opt("GCP_SERVICE_ACCOUNT_JSON") {
            Some(blob) => ServiceAccountKey::from_json(&blob)
                .map_err(|e| ConfigError::BadServiceAccount(e.to_string()))?,
            None => ServiceAccountKey::from_parts(
                env_req("GCP_SA_CLIENT_EMAIL")?,
                &env_req("GCP_SA_PRIVATE_KEY")?,
                env_req("GCP_TOKEN_URI")?,
            ),
        };

        Ok(Config {
            jwt_secret: env_req("JWT_SECRET")?,
            b2_key_id: env_req("B2_KEY_ID")?,
            b2_app_key: env_req("B2_APP_KEY")?,
            b2_bucket_name: env_req("B2_BUCKET_NAME")?,
            img_return_base: normalize_public_base(&env_req("IMG_RETURN_BASE")?),
            vertex_project_ids: split_pipes(&env_req("VERTEX_PROJECT_IDS")?),
            vertex_location: env_opt("VERTEX_LOCATION").unwrap_or_else(|| "global".to_string()),
            vertex_model: env_req("VERTEX_MODEL")?,
            vertex_endpoint_global: env_opt("VERTEX_ENDPOINT_MODE").as_deref() == Some("global"),
            service_account,
            key_prefix: env_opt("KEY_PREFIX").unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            max_images_per_response: match env_opt("MAX_IMAGES_PER_RESPONSE") {
                Some(v) => v
                    .parse()
                    .map_err(|_| ConfigError::BadValue("MAX_IMAGES_PER_RESPONSE", v))?,
                None => 1,
            },
            allow_ref_image_hosts: env_opt("ALLOW_REF_IMAGE_HOSTS")
                .map(|v| split_pipes(&v))
                .unwrap_or_default(),
            allow_ref_image_http: env_opt("ALLOW_REF_IMAGE_HTTP").as_deref() == Some("1"),
            max_ref_image_bytes: match env_opt("MAX_REF_IMAGE_BYTES") {
                Some(v) => {
                    let n: i64 = v
                        .parse()
                        .map_err(|_| ConfigError::BadValue("MAX_REF_IMAGE_BYTES", v))?;
                    if n <= 0 { None } else { Some(n as u64) }
                }
                None => None,
            },
            database_url: env_opt("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
        })
    }
}

fn env_opt(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim().to_string();
            if v.is_empty() { None } else { Some(v) }
        }
        Err(_) => None,
    }
}

fn env_req(name: &'static str) -> Result<String, ConfigError> {
    env_opt(name).ok_or(ConfigError::Missing(name))
}

// the public base is always served https, links must never end up with a
// double slash
pub fn normalize_public_base(raw: &str) -> String {
    let s = raw.trim().trim_end_matches('/');
    if let Some(rest) = s.strip_prefix("http://") {
        format!("https://{rest}")
    } else if s.starts_with("https://") {
        s.to_string()
    } else {
        format!("https://{s}")
    }
}

pub fn split_pipes(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_public_base() {
        assert_eq!("https://img.example.com", normalize_public_base("img.example.com"));
        assert_eq!(
            "https://img.example.com",
            normalize_public_base("http://img.example.com/")
        );
        assert_eq!(
            "https://img.example.com",
            normalize_public_base("https://img.example.com///")
        );
        assert_eq!(
            "https://img.example.com/base",
            normalize_public_base(" https://img.example.com/base/ ")
        );
    }

    #[test]
    fn test_split_pipes() {
        assert_eq!(vec!["a", "b", "c"], split_pipes("a|b|c"));
        assert_eq!(vec!["a", "c"], split_pipes("a||c|"));
        assert_eq!(vec!["p1"], split_pipes(" p1 "));
        assert!(split_pipes("").is_empty());
    }
}
