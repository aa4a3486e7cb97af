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

//! HTTP face of the relay: download orchestration, the streaming relay,
//! the token-attributes lookup, CORS and rate-limit gates, metrics, and the
//! server lifecycle.

pub mod cors;
pub mod download;
pub mod error;
pub mod http;
pub mod metrics;
pub mod rate_limit;
pub mod relay;
pub mod routes;
pub mod state;
pub mod token;

use std::net::SocketAddr;

use snafu::{OptionExt, ResultExt, Snafu};
use tokio::{
    sync::oneshot::{self, Receiver},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

pub use crate::{routes::build_router, state::RelayState};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(transparent)]
    Network { source: NetworkError },

    #[snafu(display("Server start signal already consumed"))]
    StartSignalConsumed,

    #[snafu(display("Server task exited before it started"))]
    StartSignalDropped { source: oneshot::error::RecvError },

    #[snafu(display("Server task failed"))]
    ServerTask { source: tokio::task::JoinError },
}

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum NetworkError {
    #[snafu(display("Failed to bind {addr}"))]
    Bind {
        addr:   String,
        #[snafu(source)]
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse address {addr}"))]
    ParseAddress {
        addr:   String,
        #[snafu(source)]
        source: std::net::AddrParseError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Handle for managing a running HTTP service.
///
/// This handle provides control over a running service, allowing you to:
/// - Wait for the service to start accepting connections
/// - Signal graceful shutdown
/// - Wait for the service to fully stop
/// - Check if the service task has completed
#[derive(Debug)]
pub struct ServiceHandler {
    /// Join handle for the server task
    join_handle:        JoinHandle<()>,
    /// Token for signalling shutdown
    cancellation_token: CancellationToken,
    /// Receiver for server start notification
    started_rx:         Option<Receiver<()>>,
    /// Address the listener is bound to
    local_addr:         SocketAddr,
}

impl ServiceHandler {
    /// Waits for the server to start accepting connections.
    ///
    /// The start signal can be consumed once; a second call returns
    /// [`Error::StartSignalConsumed`].
    pub async fn wait_for_start(&mut self) -> Result<()> {
        self.started_rx
            .take()
            .context(StartSignalConsumedSnafu)?
            .await
            .context(StartSignalDroppedSnafu)
    }

    /// Waits for the server to completely stop.
    ///
    /// Use this after calling `shutdown()`. Downloads still streaming get
    /// the configured shutdown timeout to finish before they are cut off.
    pub async fn wait_for_stop(self) -> Result<()> {
        self.join_handle.await.context(ServerTaskSnafu)
    }

    /// Signals the server to begin graceful shutdown.
    pub fn shutdown(&self) { self.cancellation_token.cancel(); }

    /// Checks if the server task has completed.
    pub fn is_finished(&self) -> bool { self.join_handle.is_finished() }

    /// The bound address; differs from the configured one when port 0 was
    /// requested.
    pub const fn local_addr(&self) -> SocketAddr { self.local_addr }
}
