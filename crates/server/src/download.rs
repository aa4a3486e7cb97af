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

//! `GET /download`: validate, fetch from the repository, relay.
//!
//! Everything that can fail is checked before the response head is built, so
//! those failures still become JSON error bodies. Once [`relay`] returns a
//! response the status is fixed; later upstream failures can only cut the
//! connection short.

use artifact_relay_common_telemetry::redact::fingerprint_opt;
use artifact_relay_error::ErrorExt;
use artifact_relay_proxy::{forwarded_range, last_segment, parse_range};
use axum::{
    body::Body,
    extract::{Query, State, rejection::QueryRejection},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{
            ACCEPT_RANGES, AUTHORIZATION, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH,
            CONTENT_RANGE, CONTENT_TYPE, EXPIRES, HOST, ORIGIN, PRAGMA, RANGE,
        },
    },
    response::{IntoResponse, Response},
};
use futures::{StreamExt, stream};
use serde::Deserialize;
use snafu::OptionExt;
use tracing::{Instrument, debug, info, info_span};

use crate::{
    cors::header_str,
    error::{ApiError, ApiResult, MissingAuthSnafu},
    metrics,
    relay::RelayBody,
    state::RelayState,
};

#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    #[serde(default)]
    pub filename: String,
}

/// One inbound download, borrowed from the HTTP request.
#[derive(Debug, Clone, Copy)]
pub struct DownloadRequest<'a> {
    pub filename:      &'a str,
    pub bearer_token:  Option<&'a str>,
    pub range_header:  Option<&'a str>,
    pub origin_header: Option<&'a str>,
    pub host_header:   Option<&'a str>,
}

/// `Authorization: Bearer <token>` with a case-insensitive scheme and a
/// single token without whitespace. A request carrying more than one
/// `Authorization` header has no usable token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let mut values = headers.get_all(AUTHORIZATION).iter();
    let value = values.next()?;
    if values.next().is_some() {
        return None;
    }
    let (scheme, token) = value
        .to_str()
        .ok()?
        .trim()
        .split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty() && !token.contains(char::is_whitespace)).then_some(token)
}

/// Replace characters that are unsafe in a saved filename.
pub fn safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect()
}

pub fn content_disposition(filename: &str) -> HeaderValue {
    let safe = safe_filename(last_segment(filename));
    let encoded = urlencoding::encode(&safe);
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{safe}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

pub async fn download(
    State(state): State<RelayState>,
    params: Result<Query<DownloadParams>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    let params = params.map(|Query(params)| params).unwrap_or_default();
    let request = DownloadRequest {
        filename:      &params.filename,
        bearer_token:  bearer_token(&headers),
        range_header:  header_str(&headers, &RANGE),
        origin_header: header_str(&headers, &ORIGIN),
        host_header:   header_str(&headers, &HOST),
    };

    let span = info_span!(
        "download",
        filename = request.filename,
        token_present = request.bearer_token.is_some(),
        token_fp = %fingerprint_opt(request.bearer_token),
        range = request.range_header.unwrap_or("-"),
    );

    match relay(&state, request).instrument(span.clone()).await {
        Ok(response) => {
            let code = if response.status() == StatusCode::PARTIAL_CONTENT {
                "PARTIAL"
            } else {
                "OK"
            };
            metrics::DOWNLOAD_REQUESTS.with_label_values(&[code]).inc();
            response
        }
        Err(err) => {
            metrics::DOWNLOAD_REQUESTS
                .with_label_values(&[err.error_code().as_ref()])
                .inc();
            let _entered = span.enter();
            err.into_response()
        }
    }
}

/// Run one download up to the point where the response head is committed.
pub async fn relay(state: &RelayState, request: DownloadRequest<'_>) -> ApiResult<Response> {
    let token = request.bearer_token.context(MissingAuthSnafu)?;
    state
        .validator
        .validate(request.filename)
        .map_err(|reason| ApiError::InvalidFilename { reason })?;

    // Headers are emitted by the CORS layers; the decision is only logged.
    let decision = state
        .origins
        .resolve(request.origin_header, request.host_header);
    let forwarded = forwarded_range(request.range_header);
    match (request.range_header, parse_range(forwarded)) {
        (Some(_), _) if forwarded.is_none() => {
            debug!("multi-range request, serving the full file");
        }
        (Some(_), Some(range)) => debug!(%range, bytes = range.byte_count(), "range requested"),
        (Some(_), None) => debug!("Range header not understood, forwarding unchanged"),
        (None, _) => {}
    }

    let url = state.upstream.artifact_url(request.filename);
    let upstream = state.upstream.fetch(url, token, forwarded).await?;

    let partial = upstream.is_partial();
    let content_length = upstream.content_length();
    let content_range = upstream.content_range().cloned();
    let mut body = upstream.into_body();

    let head = match body.next().await {
        Some(Ok(chunk)) => Some(chunk),
        Some(Err(source)) => return Err(ApiError::EarlyStreamFailure { source }),
        None => {
            body = stream::empty().boxed();
            None
        }
    };

    let status = if partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let mut response = Response::new(Body::from_stream(RelayBody::new(
        head,
        body,
        content_length,
    )));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(CONTENT_DISPOSITION, content_disposition(request.filename));
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(length) = content_length {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }
    if partial && let Some(content_range) = content_range {
        headers.insert(CONTENT_RANGE, content_range);
    }

    info!(
        status = status.as_u16(),
        content_length,
        cors = decision.allowed_origin().unwrap_or("-"),
        "headers sent"
    );
    Ok(response)
}
