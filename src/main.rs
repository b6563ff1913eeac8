use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use splitledger::auth::SessionKey;
use splitledger::balance::SettlementEngine;
use splitledger::config::AppConfig;
use splitledger::routes::{self, Engine};
use splitledger::store::{MemoryStore, MongoStore, Store};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let store: Arc<dyn Store> = match &config.mongodb_uri {
        Some(uri) => Arc::new(
            MongoStore::connect(uri, &config.mongodb_database)
                .await
                .context("failed to connect to MongoDB")?,
        ),
        None => {
            tracing::warn!("MONGODB_URI is not set, expenses are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let store = web::Data::from(store);

    let engine: Engine = SettlementEngine::with_policy(config.split_policy.into_policy())
        .departed_payer(config.departed_payer);
    let engine = web::Data::new(engine);
    let session_key = web::Data::new(SessionKey::new(&config.session_secret));
    let cors_origin = config.cors_origin.clone();

    tracing::info!(
        bind_addr = %config.bind_addr,
        split_policy = ?config.split_policy,
        "starting server"
    );

    HttpServer::new(move || {
        let cors = match &cors_origin {
            Some(origin) => Cors::default()
                .allowed_origin(origin)
                .allow_any_method()
                .allow_any_header(),
            None => Cors::permissive(),
        };
        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(store.clone())
            .app_data(engine.clone())
            .app_data(session_key.clone())
            .configure(routes::configure)
    })
    .bind(config.bind_addr.as_str())
    .with_context(|| format!("failed to bind {}", config.bind_addr))?
    .run()
    .await?;

    Ok(())
}
