use anyhow::Result;
use axum::Router;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use marketplace_bookingservice::{
    core::{
        bootstrap::{self, bootstrap},
        config, db, swagger,
    },
    routes,
};

/// Migrations embedded into the binary which helps with streamlining image building process
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    bootstrap::init_env();

    let routes = routes::profile::routes_with_openapi()
        .merge(routes::listings::routes_with_openapi())
        .merge(routes::payments::routes_with_openapi())
        .merge(routes::clients::appointments::routes_with_openapi())
        .merge(routes::clients::checkout::routes_with_openapi())
        .merge(routes::clients::ratings::routes_with_openapi())
        .merge(routes::providers::listings::routes_with_openapi())
        .merge(routes::providers::availability::routes_with_openapi())
        .merge(routes::providers::slots::routes_with_openapi())
        .merge(routes::providers::appointments::routes_with_openapi());

    let mut openapi = routes.get_openapi().clone();
    openapi.info = utoipa::openapi::InfoBuilder::new()
        .title("Marketplace BookingService API")
        .version("1.0.0")
        .build();
    let swagger_ui = swagger::create_swagger_ui(openapi)?;

    let app = Router::new().merge(routes).merge(swagger_ui);

    let config = config::load()?;

    tracing::info!("Running migrations...");
    let migrations_count = db::run_migrations_blocking(MIGRATIONS, &config.database.url).await?;
    tracing::info!("Run {} new migrations successfully", migrations_count);

    tracing::info!("Bootstrapping...");
    let state = bootstrap::build_state(config).await?;
    bootstrap("BookingService", app, state).await?;
    Ok(())
}
