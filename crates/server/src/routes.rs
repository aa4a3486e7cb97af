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

use axum::{Router, middleware::from_fn_with_state, routing::get};

use crate::{
    cors::{cors_layer, loopback_fallback},
    download::download,
    http::health_routes,
    metrics::metrics_handler,
    rate_limit::rate_limit,
    state::RelayState,
    token::token_attributes,
};

/// All routes of the relay with the CORS and rate-limit gates in front.
///
/// CORS wraps the limiter so 429 replies still carry the origin decision,
/// and preflights never count against a budget.
pub fn build_router(state: RelayState) -> Router {
    let limiter = state.limiter.clone();
    let origins = state.origins.clone();

    let router = Router::new()
        .route("/download", get(download))
        .route("/token-attributes", get(token_attributes))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    health_routes(router)
        .layer(from_fn_with_state(limiter, rate_limit))
        .layer(from_fn_with_state(origins.clone(), loopback_fallback))
        .layer(cors_layer(origins))
}
