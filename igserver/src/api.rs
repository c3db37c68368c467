//! Request/response bodies for the HTTP surface. Field spellings here are
//! the wire contract: history rows use snake_case, the generation plane and
//! upload response use camelCase, exactly as clients already send them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db;
use crate::refimage::RefInput;
use crate::tasks::TaskStatus;

// ---- auth ----

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    /// SHA-256 hex of the password, computed client-side.
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub role: String,
}

impl From<&db::User> for UserInfo {
    fn from(u: &db::User) -> Self {
        UserInfo {
            id: u.id,
            username: u.username.clone(),
            role: u.role.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserInfo,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserInfo,
}

// ---- users (admin) ----

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<db::User>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    /// SHA-256 hex, same shape as login.
    pub password: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub quota: i64,
}

fn default_role() -> String {
    crate::auth::ROLE_USER.to_string()
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub success: bool,
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub quota: Option<i64>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

// ---- quota ----

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub quota: i64,
    pub used: i64,
    pub remaining: i64,
}

#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    #[serde(default = "default_count")]
    pub count: i64,
}

fn default_count() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    pub success: bool,
    pub remaining: i64,
}

// ---- redemption codes ----

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub success: bool,
    /// Face value of the code just credited.
    pub quota: i64,
}

#[derive(Debug, Serialize)]
pub struct CodesResponse {
    pub codes: Vec<db::RedeemCode>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateCodesRequest {
    pub count: u32,
    pub quota: i64,
}

#[derive(Debug, Serialize)]
pub struct GenerateCodesResponse {
    pub success: bool,
    pub codes: Vec<String>,
}

// ---- history ----

#[derive(Debug, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub user_id: i64,
    pub prompt: String,
    pub image_url: String,
    pub options: Value,
    pub ref_images: Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<db::HistoryRow> for HistoryRecord {
    fn from(row: db::HistoryRow) -> Self {
        // options/ref_images are stored as JSON strings and re-parsed on the
        // way out; rows predating validation fall back to their neutral shape
        let options =
            serde_json::from_str(&row.options).unwrap_or(Value::Object(Default::default()));
        let ref_images =
            serde_json::from_str(&row.ref_images).unwrap_or(Value::Array(Default::default()));
        HistoryRecord {
            id: row.id,
            user_id: row.user_id,
            prompt: row.prompt,
            image_url: row.image_url,
            options,
            ref_images,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub history: Vec<HistoryRecord>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateHistoryRequest {
    pub prompt: String,
    pub image_url: String,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub ref_images: Value,
}

// ---- reference-image intake ----

#[derive(Debug, Deserialize)]
pub struct UploadImageRequest {
    /// Raw base64 or a full data URL.
    pub image: String,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadImageResponse {
    pub success: bool,
    pub url: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub size: usize,
}

// ---- generation plane ----

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, rename = "aspectRatio")]
    pub aspect_ratio: Option<String>,
    #[serde(default, rename = "imageSize")]
    pub image_size: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<Value>>,
}

#[derive(Debug, Serialize)]
pub struct GenerateAccepted {
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
}

/// The `images` array, parsed and truncated to the two entries the payload
/// can carry. Anything past two is silently dropped.
pub fn parse_ref_inputs(images: &[Value]) -> Result<Vec<RefInput>, String> {
    images
        .iter()
        .take(2)
        .map(|v| {
            serde_json::from_value::<RefInput>(v.clone())
                .map_err(|e| format!("bad reference image entry: {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_request_default_count() {
        let req: ConsumeRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(1, req.count);
        let req: ConsumeRequest = serde_json::from_str(r#"{"count": 3}"#).unwrap();
        assert_eq!(3, req.count);
    }

    #[test]
    fn test_parse_ref_inputs_drops_extras() {
        let images = vec![
            serde_json::json!("https://a.example/1.png"),
            serde_json::json!({"uri": "https://a.example/2.png"}),
            serde_json::json!("https://a.example/3.png"),
        ];
        let parsed = parse_ref_inputs(&images).unwrap();
        assert_eq!(2, parsed.len());
    }

    #[test]
    fn test_parse_ref_inputs_bad_entry() {
        let images = vec![serde_json::json!(42)];
        assert!(parse_ref_inputs(&images).is_err());
    }

    #[test]
    fn test_history_record_reparses_json() {
        let row = db::HistoryRow {
            id: 1,
            user_id: 2,
            prompt: "p".to_string(),
            image_url: "u".to_string(),
            options: r#"{"aspectRatio":"1:1","imageSize":"4K"}"#.to_string(),
            ref_images: r#"["https://x/i/a.png"]"#.to_string(),
            created_at: chrono::Utc::now(),
        };
        let rec = HistoryRecord::from(row);
        assert_eq!("1:1", rec.options["aspectRatio"]);
        assert_eq!("https://x/i/a.png", rec.ref_images[0]);
    }

    #[test]
    fn test_history_record_tolerates_bad_json() {
        let row = db::HistoryRow {
            id: 1,
            user_id: 2,
            prompt: "p".to_string(),
            image_url: "u".to_string(),
            options: "not json".to_string(),
            ref_images: "".to_string(),
            created_at: chrono::Utc::now(),
        };
        let rec = HistoryRecord::from(row);
        assert!(rec.options.is_object());
        assert!(rec.ref_images.is_array());
    }

    #[test]
    fn test_generate_request_lenient_body() {
        let req: GenerateRequest = serde_json::from_str(
            r#"{"prompt": "a red cube", "aspectRatio": "16:9", "images": ["data:image/png;base64,QUJD"]}"#,
        )
        .unwrap();
        assert_eq!(Some("a red cube"), req.prompt.as_deref());
        assert_eq!(Some("16:9"), req.aspect_ratio.as_deref());
        assert!(req.image_size.is_none());
        assert_eq!(1, req.images.unwrap().len());
    }
}
