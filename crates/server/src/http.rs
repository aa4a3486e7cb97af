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

use std::{net::SocketAddr, pin::pin, time::Duration};

use axum::{
    Json, Router,
    body::{Body, HttpBody},
    extract::{DefaultBodyLimit, State},
    http::header::{AUTHORIZATION, COOKIE},
    middleware,
    response::Response,
    routing::get,
};
use axum_tracing_opentelemetry::middleware::{OtelAxumLayer, OtelInResponseLayer};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ResultExt;
use tokio::{net::TcpListener, sync::oneshot};
use tokio_util::sync::CancellationToken;
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tracing::{info, warn};

use crate::{BindSnafu, ParseAddressSnafu, Result, ServiceHandler};

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:3000";

/// Default maximum HTTP request body size (64 KiB); the relay only serves GET.
pub const DEFAULT_MAX_HTTP_BODY_SIZE: usize = 64 * 1024;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration options for a REST server
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, bon::Builder)]
#[serde(default)]
pub struct RestServerConfig {
    /// The address to bind the REST server
    #[default(DEFAULT_BIND_ADDRESS.to_string())]
    #[builder(into, default = DEFAULT_BIND_ADDRESS.to_string())]
    pub bind_address:  String,
    /// Maximum HTTP request body size in bytes
    #[default(DEFAULT_MAX_HTTP_BODY_SIZE)]
    #[builder(default = DEFAULT_MAX_HTTP_BODY_SIZE)]
    pub max_body_size: usize,
    /// How long responses still streaming may run after shutdown is
    /// signalled before they are cut off
    #[default(DEFAULT_SHUTDOWN_TIMEOUT)]
    #[builder(default = DEFAULT_SHUTDOWN_TIMEOUT)]
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Starts the REST server and returns a handle for managing its lifecycle.
///
/// The listener is bound before this returns, so bind failures surface here
/// and [`ServiceHandler::local_addr`] is known even for port 0. Tracing,
/// sensitive-header marking and the body limit are layered around `router`.
/// Connections carry their peer address as `ConnectInfo<SocketAddr>`.
///
/// After [`ServiceHandler::shutdown`] the server stops accepting and lets
/// open responses finish for up to `shutdown_timeout`. Streaming bodies still
/// open at the deadline are ended early, which drops them and closes their
/// connections.
///
/// # Example
///
/// ```rust,no_run
/// use axum::{Router, routing::get};
/// use artifact_relay_server::http::{RestServerConfig, start_rest_server};
///
/// # async fn run() -> artifact_relay_server::Result<()> {
/// let router = Router::new().route("/hello", get(|| async { "Hello" }));
/// let mut handle = start_rest_server(RestServerConfig::default(), router).await?;
/// handle.wait_for_start().await?;
/// handle.shutdown();
/// handle.wait_for_stop().await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_rest_server(config: RestServerConfig, router: Router) -> Result<ServiceHandler> {
    let bind_addr = config
        .bind_address
        .parse::<SocketAddr>()
        .context(ParseAddressSnafu {
            addr: config.bind_address.clone(),
        })?;

    let drain = CancellationToken::new();
    let router = router
        .layer(middleware::map_response_with_state(
            drain.clone(),
            end_streams_on_drain,
        ))
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(OtelInResponseLayer::default())
        .layer(OtelAxumLayer::default())
        .layer(SetSensitiveRequestHeadersLayer::new([AUTHORIZATION, COOKIE]));

    let listener = TcpListener::bind(bind_addr).await.context(BindSnafu {
        addr: config.bind_address.clone(),
    })?;
    let local_addr = listener.local_addr().context(BindSnafu {
        addr: config.bind_address.clone(),
    })?;

    let cancellation_token = CancellationToken::new();
    let (started_tx, started_rx) = oneshot::channel::<()>();
    let shutdown = cancellation_token.clone();
    let stopping = cancellation_token.clone();
    let grace = config.shutdown_timeout;
    let join_handle = tokio::spawn(async move {
        let server = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = started_tx.send(());
            info!("REST server (on {local_addr}) started");
            shutdown.cancelled().await;
            info!("REST server (on {local_addr}) received shutdown signal");
        });
        let mut server = pin!(server.into_future());

        let result = tokio::select! {
            result = &mut server => result,
            () = async {
                stopping.cancelled().await;
                tokio::time::sleep(grace).await;
            } => {
                warn!("REST server (on {local_addr}) still busy after {grace:?}, ending open responses");
                drain.cancel();
                match tokio::time::timeout(grace, server).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("REST server (on {local_addr}) abandoned connections that did not close");
                        Ok(())
                    }
                }
            }
        };

        info!("REST server (on {local_addr}) task completed: {result:?}");
    });

    Ok(ServiceHandler {
        join_handle,
        cancellation_token,
        started_rx: Some(started_rx),
        local_addr,
    })
}

/// Make streamed bodies end once `drain` fires. Bodies of known size are
/// left alone; they are already complete in memory.
async fn end_streams_on_drain(State(drain): State<CancellationToken>, response: Response) -> Response {
    if response.body().size_hint().exact().is_some() {
        return response;
    }
    let (parts, body) = response.into_parts();
    let body = body
        .into_data_stream()
        .take_until(drain.cancelled_owned());
    Response::from_parts(parts, Body::from_stream(body))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Liveness endpoint, outside the download pipeline.
pub fn health_routes(router: Router) -> Router { router.route("/health", get(health_handler)) }

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .try_init();
    }

    fn ephemeral() -> RestServerConfig { RestServerConfig::builder().bind_address("127.0.0.1:0").build() }

    #[tokio::test]
    async fn test_rest_server_lifecycle() {
        init_test_logging();

        let mut handler = start_rest_server(ephemeral(), health_routes(Router::new()))
            .await
            .unwrap();
        handler.wait_for_start().await.unwrap();
        assert_ne!(handler.local_addr().port(), 0);

        let response = reqwest::get(format!("http://{}/health", handler.local_addr()))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "OK");
        assert!(body["timestamp"].is_string());

        handler.shutdown();
        handler.wait_for_stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_bind_address() {
        let config = RestServerConfig::builder().bind_address("not-an-address").build();
        let Err(err) = start_rest_server(config, Router::new()).await else {
            panic!("bind address should not parse");
        };
        assert!(err.to_string().contains("not-an-address"));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let config = RestServerConfig::builder().bind_address(addr.as_str()).build();
        assert!(start_rest_server(config, Router::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_start_signal_consumed_once() {
        let mut handler = start_rest_server(ephemeral(), Router::new()).await.unwrap();
        handler.wait_for_start().await.unwrap();
        assert!(handler.wait_for_start().await.is_err());
        handler.shutdown();
        handler.wait_for_stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_ends_endless_stream_after_timeout() {
        init_test_logging();

        let endless = || async {
            let chunks = futures::stream::repeat_with(|| {
                Ok::<_, std::io::Error>(bytes::Bytes::from_static(b"tick"))
            })
            .then(|chunk| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                chunk
            });
            Body::from_stream(chunks)
        };
        let config = RestServerConfig::builder()
            .bind_address("127.0.0.1:0")
            .shutdown_timeout(Duration::from_millis(200))
            .build();
        let mut handler = start_rest_server(config, Router::new().route("/stream", get(endless)))
            .await
            .unwrap();
        handler.wait_for_start().await.unwrap();

        let mut response = reqwest::get(format!("http://{}/stream", handler.local_addr()))
            .await
            .unwrap();
        assert!(response.chunk().await.unwrap().is_some());

        handler.shutdown();
        let stopped = tokio::time::timeout(Duration::from_secs(5), handler.wait_for_stop()).await;
        assert!(matches!(stopped, Ok(Ok(()))));

        // The client sees the stream end or break rather than hang.
        let rest = tokio::time::timeout(Duration::from_secs(5), async {
            while let Ok(Some(_)) = response.chunk().await {}
        })
        .await;
        assert!(rest.is_ok());
    }

    #[test]
    fn test_config_defaults() {
        let config = RestServerConfig::default();
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.max_body_size, 64 * 1024);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(RestServerConfig::builder().build(), config);
    }

    #[test]
    fn test_shutdown_timeout_reads_humantime() {
        let config: RestServerConfig =
            serde_json::from_str(r#"{"shutdown_timeout": "1m 30s"}"#).unwrap();
        assert_eq!(config.shutdown_timeout, Duration::from_secs(90));
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
    }
}
