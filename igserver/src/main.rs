use std::sync::Arc;

use clap::Parser;
use log::info;
use sqlx::sqlite::SqlitePoolOptions;

use igserver::config::Config;
use igserver::{Ctx, db, ensure_admin, routes};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long)]
    tcp: Option<String>,

    #[arg(long)]
    uds: Option<String>,

    /// Overrides DATABASE_URL.
    #[arg(long)]
    db: Option<String>,
}

fn setup_logs() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[tokio::main]
async fn main() {
    setup_logs();
    let args = Args::parse();

    if args.tcp.is_none() && args.uds.is_none() {
        eprintln!("--tcp or --uds must be provided");
        std::process::exit(1);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(1);
        }
    };

    let database_url = args.db.unwrap_or_else(|| config.database_url.clone());
    info!("opening {database_url}");
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .unwrap();
    db::init_db(&pool).await.unwrap();
    ensure_admin(&pool).await.unwrap();

    let ctx = Arc::new(Ctx::new(config, pool).unwrap());
    let app = routes::router(ctx);

    match (args.tcp, args.uds) {
        (Some(addr), None) => {
            info!("listening on tcp {addr}");
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    tokio::signal::ctrl_c().await.unwrap();
                })
                .await
                .unwrap();
        }
        (None, Some(addr)) => {
            let _ = std::fs::remove_file(&addr);
            info!("listening on uds {addr}");
            let listener = tokio::net::UnixListener::bind(addr).unwrap();
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    tokio::signal::ctrl_c().await.unwrap();
                })
                .await
                .unwrap();
        }
        (Some(_), Some(_)) => panic!("cannot use --tcp and --uds"),
        (None, None) => unreachable!(),
    };
}
