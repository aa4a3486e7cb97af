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

//! `GET /token-attributes`: what the repository knows about the caller's
//! token.

use artifact_relay_common_telemetry::redact::fingerprint_opt;
use artifact_relay_error::ErrorExt;
use artifact_relay_proxy::TokenAttributes;
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, header::CACHE_CONTROL},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use snafu::{OptionExt, ResultExt};
use tracing::{Instrument, debug, info, info_span};

use crate::{
    download::bearer_token,
    error::{ApiResult, MissingAuthSnafu, TokenLookupSnafu},
    metrics,
    state::RelayState,
};

#[derive(Debug, Serialize)]
pub struct TokenAttributesBody {
    pub tokens: Vec<TokenAttributes>,
}

pub async fn token_attributes(State(state): State<RelayState>, headers: HeaderMap) -> Response {
    let token = bearer_token(&headers);
    let span = info_span!(
        "token_attributes",
        token_present = token.is_some(),
        token_fp = %fingerprint_opt(token),
    );

    match lookup(&state, token).instrument(span.clone()).await {
        Ok(body) => {
            metrics::TOKEN_LOOKUPS.with_label_values(&["OK"]).inc();
            let mut response = Json(body).into_response();
            response
                .headers_mut()
                .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(err) => {
            metrics::TOKEN_LOOKUPS
                .with_label_values(&[err.error_code().as_ref()])
                .inc();
            let _entered = span.enter();
            err.into_response()
        }
    }
}

async fn lookup(state: &RelayState, token: Option<&str>) -> ApiResult<TokenAttributesBody> {
    let token = token.context(MissingAuthSnafu)?;
    let tokens = state
        .upstream
        .token_attributes(token)
        .await
        .context(TokenLookupSnafu)?;

    info!(count = tokens.len(), "token attributes fetched");
    for entry in &tokens {
        debug!(
            token_id = entry.token_id.as_deref().unwrap_or("-"),
            subject = entry.subject.as_deref().unwrap_or("-"),
            scope = entry.scope.as_deref().unwrap_or("-"),
            expires_at = entry.expiry,
            "token"
        );
    }
    Ok(TokenAttributesBody { tokens })
}
