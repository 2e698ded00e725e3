use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum_server::Handle;
use blob_store::{BlobStorage, StorageGateway};
use metrics::init_provider;
use state_store::{open_registry, ShareRegistry};
use tokio::signal;
use tracing::info;

use crate::{
    config::ServerConfig,
    routes::{create_routes, routes_state::RouteState},
    share::{ShareLinks, ShareResolver},
    upload::UploadCoordinator,
};

#[derive(Clone)]
pub struct Service {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<dyn ShareRegistry>,
    pub coordinator: UploadCoordinator,
    pub resolver: Arc<ShareResolver>,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let blob_storage = Arc::new(
            BlobStorage::new(config.blob_storage.clone())
                .context("error initializing BlobStorage")?,
        );
        let registry =
            open_registry(&config.registry).context("error initializing share registry")?;
        info!(
            backend = config.registry.backend_name(),
            "share registry ready"
        );
        Ok(Self::with_components(config, blob_storage, registry))
    }

    pub fn with_components(
        config: ServerConfig,
        gateway: Arc<dyn StorageGateway>,
        registry: Arc<dyn ShareRegistry>,
    ) -> Self {
        let metrics = Arc::new(metrics::api_io_stats::Metrics::new());
        let links = ShareLinks::new(&config.share_base_url);
        let coordinator = UploadCoordinator::new(
            gateway.clone(),
            registry.clone(),
            config.limits.clone(),
            links.clone(),
            metrics.clone(),
        );
        let resolver = Arc::new(ShareResolver::new(
            registry.clone(),
            gateway,
            links,
            metrics,
        ));
        Self {
            config: Arc::new(config),
            registry,
            coordinator,
            resolver,
        }
    }

    pub fn route_state(&self) -> RouteState {
        RouteState {
            coordinator: self.coordinator.clone(),
            resolver: self.resolver.clone(),
            config: self.config.clone(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        init_provider(
            self.config.telemetry.enable_metrics,
            self.config.telemetry.endpoint.as_ref(),
            self.config.telemetry.metrics_interval,
            self.config.telemetry.instance_id.as_ref(),
            env!("CARGO_PKG_VERSION"),
        )?;

        self.resolver
            .recover_pending_deletes()
            .await
            .context("error finishing interrupted deletes")?;

        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        let routes = create_routes(self.route_state());
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.shutdown();
    info!("signal received, shutting down server gracefully");
}
