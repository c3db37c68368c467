pub mod api;
pub mod auth;
pub mod codes;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod proxy;
pub mod refimage;
pub mod routes;
pub mod tasks;

use std::sync::Arc;

use log::warn;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::ServerError;
use crate::proxy::CachedObject;
use crate::tasks::TaskStore;

// edge cache for /i/ downloads, sized by body bytes
const EDGE_CACHE_CAPACITY: u64 = 512_000_000;

pub struct Ctx {
    pub config: Config,
    pub db: SqlitePool,
    pub b2: igb2::Client,
    pub vertex: igvertex::Client,
    pub tasks: TaskStore,
    pub edge_cache: moka::future::Cache<String, Arc<CachedObject>>,
    pub http: reqwest::Client,
}

impl Ctx {
    pub fn new(config: Config, db: SqlitePool) -> Result<Ctx, ServerError> {
        let b2 = igb2::Client::builder(
            config.b2_key_id.clone(),
            config.b2_app_key.clone(),
            config.b2_bucket_name.clone(),
        )
        .build()?;

        let vertex = igvertex::Client::builder(config.service_account.clone())
            .projects(config.vertex_project_ids.clone())
            .location(config.vertex_location.clone())
            .model(config.vertex_model.clone())
            .endpoint_global(config.vertex_endpoint_global)
            .build()?;

        let edge_cache = moka::future::Cache::builder()
            .max_capacity(EDGE_CACHE_CAPACITY)
            .weigher(|k: &String, v: &Arc<CachedObject>| {
                (k.len() + v.body.len()).try_into().unwrap_or(u32::MAX)
            })
            .build();

        let http = reqwest::Client::builder().build()?;

        Ok(Ctx {
            config,
            db,
            b2,
            vertex,
            tasks: TaskStore::new(),
            edge_cache,
            http,
        })
    }
}

/// First-run bootstrap: an empty users table gets the default admin
/// (password `admin`, client-side digest shape) so someone can log in and
/// create real accounts.
pub async fn ensure_admin(pool: &SqlitePool) -> Result<(), ServerError> {
    if db::count_users(pool).await? > 0 {
        return Ok(());
    }
    let digest = auth::sha256_hex("admin");
    let hash = auth::hash_password_digest(&digest)
        .map_err(|e| ServerError::Bootstrap(format!("{e:?}")))?;
    db::create_user(pool, "admin", &hash, auth::ROLE_ADMIN, 0).await?;
    warn!("users table was empty, seeded default admin account; change its password");
    Ok(())
}
