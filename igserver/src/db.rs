//! Relational store: users, redemption codes, usage logs, history.
//!
//! The two money paths (quota consume, code redeem) are written so the check
//! and the write commit together: consume is a single conditional UPDATE,
//! redeem is one transaction whose code-flip carries its own `used = 0`
//! guard. Two concurrent consumers of the last credit, or two redeemers of
//! the same code, get exactly one success between them.

use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_digest: String,
    pub role: String,
    pub quota: i64,
    pub used: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RedeemCode {
    pub id: i64,
    pub code: String,
    pub quota: i64,
    pub used: bool,
    pub used_by: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryRow {
    pub id: i64,
    pub user_id: i64,
    pub prompt: String,
    pub image_url: String,
    pub options: String,
    pub ref_images: String,
    pub created_at: DateTime<Utc>,
}

pub async fn init_db(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_digest TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            quota INTEGER NOT NULL DEFAULT 0,
            used INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS redeem_codes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            quota INTEGER NOT NULL,
            used INTEGER NOT NULL DEFAULT 0,
            used_by TEXT,
            used_at TEXT,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_redeem_codes_used ON redeem_codes(used)",
        "CREATE TABLE IF NOT EXISTS usage_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            username TEXT NOT NULL,
            action TEXT NOT NULL,
            detail TEXT,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_usage_logs_user ON usage_logs(user_id)",
        "CREATE TABLE IF NOT EXISTS history_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            prompt TEXT NOT NULL,
            image_url TEXT NOT NULL,
            options TEXT NOT NULL DEFAULT '{}',
            ref_images TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_history_user_created
            ON history_records(user_id, created_at)",
    ];
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

// ---- users ----

pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_user_by_username(
    pool: &SqlitePool,
    username: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id").fetch_all(pool).await
}

pub async fn count_users(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(pool).await
}

pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
    role: &str,
    quota: i64,
) -> Result<i64, sqlx::Error> {
    let now = Utc::now();
    let res = sqlx::query(
        "INSERT INTO users (username, password_digest, role, quota, used, created_at, updated_at)
         VALUES (?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(username)
    .bind(password_hash)
    .bind(role)
    .bind(quota)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

/// Partial update; absent fields keep their value, `updated_at` always moves.
pub async fn update_user(
    pool: &SqlitePool,
    id: i64,
    quota: Option<i64>,
    password_hash: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE users SET
            quota = COALESCE(?, quota),
            password_digest = COALESCE(?, password_digest),
            updated_at = ?
         WHERE id = ?",
    )
    .bind(quota)
    .bind(password_hash)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Hard delete; history rows go with the user in the same transaction. The
/// usage log keeps its rows as audit trail (it records the username).
pub async fn delete_user(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM history_records WHERE user_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let res = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(res.rows_affected() > 0)
}

// ---- quota ----

/// Check-and-decrement in one conditional UPDATE. Returns the remaining
/// credit on success, `None` when the balance cannot cover `count`.
pub async fn consume_quota(
    pool: &SqlitePool,
    id: i64,
    count: i64,
) -> Result<Option<i64>, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE users SET used = used + ?, updated_at = ?
         WHERE id = ? AND quota - used >= ?",
    )
    .bind(count)
    .bind(Utc::now())
    .bind(id)
    .bind(count)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Ok(None);
    }
    let remaining: i64 = sqlx::query_scalar("SELECT quota - used FROM users WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(Some(remaining))
}

// ---- redemption ----

pub enum RedeemOutcome {
    /// Unknown code, or someone already used it.
    Invalid,
    /// The code's face value, now credited to the user.
    Credited { quota: i64 },
}

pub async fn redeem_code(
    pool: &SqlitePool,
    user_id: i64,
    username: &str,
    code: &str,
) -> Result<RedeemOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let row: Option<(i64, i64)> =
        sqlx::query_as("SELECT id, quota FROM redeem_codes WHERE code = ? AND used = 0")
            .bind(code)
            .fetch_optional(&mut *tx)
            .await?;
    let Some((code_id, code_quota)) = row else {
        return Ok(RedeemOutcome::Invalid);
    };
    let now = Utc::now();
    // the `used = 0` guard re-checks under the write lock, a racing redeemer
    // flips zero rows here and loses
    let flipped = sqlx::query(
        "UPDATE redeem_codes SET used = 1, used_by = ?, used_at = ? WHERE id = ? AND used = 0",
    )
    .bind(username)
    .bind(now)
    .bind(code_id)
    .execute(&mut *tx)
    .await?;
    if flipped.rows_affected() == 0 {
        return Ok(RedeemOutcome::Invalid);
    }
    sqlx::query("UPDATE users SET quota = quota + ?, updated_at = ? WHERE id = ?")
        .bind(code_quota)
        .bind(now)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO usage_logs (user_id, username, action, detail, created_at)
         VALUES (?, ?, 'redeem_code', ?, ?)",
    )
    .bind(user_id)
    .bind(username)
    .bind(code)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(RedeemOutcome::Credited { quota: code_quota })
}

pub async fn insert_code(pool: &SqlitePool, code: &str, quota: i64) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO redeem_codes (code, quota, used, created_at) VALUES (?, ?, 0, ?)")
        .bind(code)
        .bind(quota)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_codes(pool: &SqlitePool) -> Result<Vec<RedeemCode>, sqlx::Error> {
    sqlx::query_as::<_, RedeemCode>("SELECT * FROM redeem_codes ORDER BY id DESC")
        .fetch_all(pool)
        .await
}

// ---- usage log ----

pub async fn log_usage(
    pool: &SqlitePool,
    user_id: i64,
    username: &str,
    action: &str,
    detail: Option<&str>,
) {
    let res = sqlx::query(
        "INSERT INTO usage_logs (user_id, username, action, detail, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(username)
    .bind(action)
    .bind(detail)
    .bind(Utc::now())
    .execute(pool)
    .await;
    // the log is best-effort, a failed insert must not fail the request
    if let Err(e) = res {
        warn!("usage log insert failed for {username}/{action}: {e}");
    }
}

// ---- history ----

pub async fn insert_history(
    pool: &SqlitePool,
    user_id: i64,
    prompt: &str,
    image_url: &str,
    options_json: &str,
    ref_images_json: &str,
) -> Result<i64, sqlx::Error> {
    let res = sqlx::query(
        "INSERT INTO history_records (user_id, prompt, image_url, options, ref_images, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(prompt)
    .bind(image_url)
    .bind(options_json)
    .bind(ref_images_json)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

pub async fn list_history(
    pool: &SqlitePool,
    user_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<HistoryRow>, sqlx::Error> {
    sqlx::query_as::<_, HistoryRow>(
        "SELECT * FROM history_records WHERE user_id = ?
         ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub enum HistoryDelete {
    NotFound,
    NotOwner,
    Deleted,
}

pub async fn delete_history(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
) -> Result<HistoryDelete, sqlx::Error> {
    let owner: Option<i64> = sqlx::query_scalar("SELECT user_id FROM history_records WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match owner {
        None => Ok(HistoryDelete::NotFound),
        Some(owner) if owner != user_id => Ok(HistoryDelete::NotOwner),
        Some(_) => {
            sqlx::query("DELETE FROM history_records WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await?;
            Ok(HistoryDelete::Deleted)
        }
    }
}
