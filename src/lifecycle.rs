// Application lifecycle: component bootstrap and HTTP server run loop.

use actix_web::{web, App, HttpServer};
use anyhow::Result;
use log::info;
use std::sync::Arc;

use streamsight_live::ViewRegistry;
use streamsight_source::MemorySource;

use crate::config::ServerConfig;

/// Long-lived application components, built once at startup.
pub struct AppComponents {
    pub source: Arc<MemorySource>,
    pub registry: Arc<ViewRegistry>,
}

/// Build the composition root: the document source and the view registry
/// that owns the change-feed multiplexer. No ambient globals: everything
/// downstream receives these by handle.
pub fn bootstrap(_config: &ServerConfig) -> Result<AppComponents> {
    let source = Arc::new(MemorySource::new());
    let registry = Arc::new(ViewRegistry::new(source.clone()));

    Ok(AppComponents { source, registry })
}

/// Run the HTTP server until a termination signal, then stop every live
/// view so change-feed subscriptions release cleanly.
pub async fn run(config: &ServerConfig, components: AppComponents) -> Result<()> {
    let AppComponents { source, registry } = components;
    let scope_prefix = format!("/{}/api", config.server.api_version);

    info!(
        "Listening on {}:{} (API prefix {})",
        config.server.host, config.server.port, scope_prefix
    );

    let registry_for_app = registry.clone();
    let source_for_app = source.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry_for_app.clone()))
            .app_data(web::Data::new(source_for_app.clone()))
            .service(web::scope(&scope_prefix).configure(streamsight_api::configure))
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    info!("Server stopped; shutting down live views");
    registry.stop_all();

    Ok(())
}
