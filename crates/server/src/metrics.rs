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

//! Process-wide Prometheus metrics for downloads and the relay.

use std::sync::LazyLock;

use axum::{http::header, response::IntoResponse};
use prometheus::{
    IntCounter, IntCounterVec, IntGauge, TextEncoder, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};
use snafu::ResultExt;

use crate::error::{ApiResult, EncodeMetricsSnafu};

/// Download requests by response code (`OK`, `PARTIAL`, or an error code).
pub static DOWNLOAD_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "artifact_relay_download_requests_total",
        "download requests by outcome code",
        &["code"]
    )
    .unwrap()
});

pub static BYTES_RELAYED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "artifact_relay_bytes_relayed_total",
        "bytes forwarded from upstream to clients"
    )
    .unwrap()
});

pub static ACTIVE_DOWNLOADS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "artifact_relay_active_downloads",
        "relays currently streaming"
    )
    .unwrap()
});

/// Terminal relay outcomes: `completed`, `aborted`, `cancelled`.
pub static RELAY_OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "artifact_relay_relay_outcomes_total",
        "finished relays by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Token-attribute lookups by response code.
pub static TOKEN_LOOKUPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "artifact_relay_token_lookups_total",
        "token attribute lookups by outcome code",
        &["code"]
    )
    .unwrap()
});

pub static RATE_LIMITED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "artifact_relay_rate_limited_total",
        "requests refused by the rate limiter",
        &["class"]
    )
    .unwrap()
});

/// `GET /metrics` in the text exposition format.
pub async fn metrics_handler() -> ApiResult<impl IntoResponse> {
    let body = TextEncoder::new()
        .encode_to_string(&prometheus::gather())
        .context(EncodeMetricsSnafu)?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body))
}
