// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub mod config;

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use artifact_relay_server::{RelayState, build_router, http::start_rest_server};
use smart_default::SmartDefault;
use snafu::{ResultExt, Whatever};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use crate::config::{AppConfig, ConfigLoadError};

/// Represents the main application with lifecycle management
#[derive(SmartDefault)]
pub struct App {
    /// Application configuration
    pub config:             AppConfig,
    /// Controls if the application should continue running
    #[default(_code = "Arc::new(AtomicBool::new(false))")]
    pub running:            Arc<AtomicBool>,
    /// Cancellation token, cancelled once the server has stopped
    #[default(_code = "CancellationToken::new()")]
    pub cancellation_token: CancellationToken,
}

impl AppConfig {
    #[must_use]
    pub fn open(self) -> App {
        App {
            config: self,
            ..Default::default()
        }
    }
}

/// Handle for controlling a running application
pub struct AppHandle {
    /// Sender for triggering shutdown
    shutdown_tx:        Option<oneshot::Sender<()>>,
    /// Application running flag
    running:            Arc<AtomicBool>,
    /// Cancellation token
    cancellation_token: CancellationToken,
    /// Address the HTTP server is bound to
    local_addr:         SocketAddr,
}

impl AppHandle {
    /// Gracefully shutdown the application
    pub fn shutdown(&mut self) {
        info!("Initiating graceful shutdown");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Check if the application is still running
    #[must_use]
    pub fn is_running(&self) -> bool { self.running.load(Ordering::SeqCst) }

    /// Wait until the server has fully stopped
    pub async fn wait_for_shutdown(&self) { self.cancellation_token.cancelled().await; }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr { self.local_addr }
}

impl App {
    /// Start the application and return a handle for controlling it
    pub async fn start(&self) -> Result<AppHandle, Whatever> {
        info!("Starting artifact relay");

        let state = RelayState::new(&self.config.proxy, self.config.rate_limit.clone())
            .whatever_context("Invalid proxy configuration")?;
        let upstream = state.upstream.base().clone();

        let mut http_handle = start_rest_server(self.config.http.clone(), build_router(state))
            .await
            .whatever_context("Failed to start REST server")?;
        http_handle
            .wait_for_start()
            .await
            .whatever_context("REST server did not start")?;
        let local_addr = http_handle.local_addr();

        self.running.store(true, Ordering::SeqCst);
        info!(%local_addr, %upstream, "Application started successfully");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let running = Arc::clone(&self.running);
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            shutdown_signal(shutdown_rx).await;

            running.store(false, Ordering::SeqCst);
            info!("Shutting down servers");
            http_handle.shutdown();
            if let Err(err) = http_handle.wait_for_stop().await {
                error!(error = %err, "REST server stopped abnormally");
            }

            cancellation_token.cancel();
            info!("Application shutdown complete");
        });

        Ok(AppHandle {
            shutdown_tx: Some(shutdown_tx),
            running: Arc::clone(&self.running),
            cancellation_token: self.cancellation_token.clone(),
            local_addr,
        })
    }

    /// Run the application blocking until it's shut down
    pub async fn run(self) -> Result<(), Whatever> {
        let handle = self.start().await?;
        handle.wait_for_shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal(shutdown_rx: oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C signal"); },
        () = terminate => { info!("Received terminate signal"); },
        _ = shutdown_rx => { info!("Received shutdown signal"); },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use artifact_relay_server::http::RestServerConfig;

    use super::*;

    fn ephemeral() -> AppConfig {
        AppConfig::builder()
            .http(
                RestServerConfig::builder()
                    .bind_address("127.0.0.1:0")
                    .build(),
            )
            .build()
    }

    #[tokio::test]
    async fn test_app_creation() {
        let app = AppConfig::default().open();
        assert!(!app.running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_app_serves_and_shuts_down() {
        let app = ephemeral().open();
        let mut handle = app.start().await.unwrap();
        assert!(handle.is_running());

        let response = reqwest::get(format!("http://{}/health", handle.local_addr()))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle.wait_for_shutdown())
            .await
            .unwrap();
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_invalid_proxy_config_fails_start() {
        let mut config = ephemeral();
        config.proxy.artifactory_url = "not a url".to_string();
        assert!(config.open().start().await.is_err());
    }
}
