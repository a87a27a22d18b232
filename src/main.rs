use std::sync::Arc;

use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use forumdb::openapi::ApiDoc;
use forumdb::repo::Repo;
use forumdb::{config, AppState, StoreConfig};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = StoreConfig::from_env();
    info!(
        "Bootstrapping forumdb (max connections {}, acquire timeout {:?})",
        cfg.max_connections, cfg.acquire_timeout
    );

    let state = AppState::new(build_repo(&cfg).await?);
    let openapi = ApiDoc::openapi();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&cfg.bind)
    .with_context(|| format!("binding {}", cfg.bind))?;

    info!("Listening on http://{}", cfg.bind);
    server.run().await?;
    Ok(())
}

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &StoreConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use sqlx::postgres::PgPoolOptions;

    let url = cfg.database_url.as_deref().context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(cfg.acquire_timeout)
        .connect(url)
        .await
        .context("connecting to Postgres")?;
    sqlx::migrate!("./migrations").run(&pool).await.context("applying migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(forumdb::repo::pg::PgRepo::new(pool)))
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(cfg: &StoreConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use forumdb::pool::StorePool;
    use forumdb::repo::inmem::InMemRepo;

    info!("Using in-memory repository backend");
    Ok(Arc::new(InMemRepo::with_pool(StorePool::from_config(cfg))))
}
