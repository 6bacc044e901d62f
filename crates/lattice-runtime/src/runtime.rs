//! Process orchestration.
//!
//! Wires the pieces together in dependency order: cluster clients, engine,
//! hub, HTTP listener. Everything is initialized once here and passed down
//! explicitly; there are no ambient globals.

use std::sync::Arc;

use tokio::signal;
use tracing::info;

use lattice_cluster::{AmqpBus, EtcdPresence};
use lattice_core::{ClusterContext, Engine, GatewayConfig};
use lattice_gateway::{GatewayState, Hub, server};

use crate::error::RuntimeResult;

/// One running gateway instance.
///
/// ```rust,ignore
/// let config = load_config_from_file("etc/webSocketService.yaml")?;
/// let runtime = GatewayRuntime::init(config).await?;
/// runtime.run().await?;
/// ```
pub struct GatewayRuntime {
    config: Arc<GatewayConfig>,
    ctx: ClusterContext,
    state: Arc<GatewayState>,
}

impl GatewayRuntime {
    /// Initializes a gateway with empty handler chains.
    pub async fn init(config: GatewayConfig) -> RuntimeResult<Self> {
        Self::init_with(config, |_| {}).await
    }

    /// Initializes a gateway, letting the caller install handler chains on
    /// the engine before it is shared.
    ///
    /// Connects the presence registry and the message bus (both fatal on
    /// failure), spawns the hub loop and prepares the HTTP state.
    pub async fn init_with(
        config: GatewayConfig,
        configure: impl FnOnce(&mut Engine),
    ) -> RuntimeResult<Self> {
        let config = Arc::new(config);

        let presence = EtcdPresence::connect(&config.etcd.hosts).await?;
        info!(endpoints = ?config.etcd.hosts, "presence registry connected");
        let bus = AmqpBus::connect(&config.rabbitmq.mq_url).await?;
        info!("message bus connected");

        let ctx = ClusterContext::new(Arc::new(presence), Arc::new(bus));

        let mut engine = Engine::new(Arc::clone(&config));
        if config.jwt_enabled() {
            engine.enable_auth();
        }
        configure(&mut engine);
        let engine = Arc::new(engine);

        let (hub, hub_handle) = Hub::new(Arc::clone(&engine), ctx.clone());
        tokio::spawn(hub.run());

        let state = Arc::new(GatewayState::new(engine, ctx.clone(), hub_handle));
        info!(instance = %config.instance_address(), "gateway initialized");

        Ok(Self { config, ctx, state })
    }

    /// The cluster context this instance runs under.
    pub fn ctx(&self) -> &ClusterContext {
        &self.ctx
    }

    /// Serves until Ctrl-C or SIGTERM, then shuts down gracefully: the
    /// shutdown token stops the hub loop and drains the listener.
    pub async fn run(self) -> RuntimeResult<()> {
        let shutdown = self.ctx.shutdown().clone();
        tokio::spawn(async move {
            wait_for_shutdown().await;
            shutdown.cancel();
        });

        server::serve(self.state, &self.config.listen_address()).await?;
        info!("gateway stopped");
        Ok(())
    }

    /// Serves until the given future resolves. Used by embedders and tests
    /// that control shutdown themselves.
    pub async fn run_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.ctx.shutdown().clone();
        tokio::spawn(async move {
            shutdown.await;
            token.cancel();
        });

        server::serve(self.state, &self.config.listen_address()).await?;
        Ok(())
    }
}

/// Waits for shutdown signals (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down");
    }
}
