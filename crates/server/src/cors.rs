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

//! Origin negotiation applied to every response.
//!
//! [`cors_layer`] answers preflights and echoes allow-listed origins on
//! every response, errors and 429s included. [`loopback_fallback`] adds the
//! one rule `CorsLayer` cannot express: a request without `Origin` whose
//! `Host` is a loopback address is answered with `http://<host>`.

use std::{sync::Arc, time::Duration};

use artifact_relay_proxy::OriginResolver;
use axum::{
    extract::{Request, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method,
        header::{
            ACCEPT, ACCEPT_RANGES, ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION,
            CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HOST, ORIGIN, RANGE,
        },
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

const MAX_AGE: Duration = Duration::from_secs(600);

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Preflight answers and `Access-Control-*` headers for allow-listed origins.
///
/// Download metadata headers are exposed so the calling page can name the
/// saved file and resume it.
pub fn cors_layer(resolver: Arc<OriginResolver>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _: &Parts| {
                origin
                    .to_str()
                    .is_ok_and(|origin| resolver.resolve(Some(origin), None).is_allowed())
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            ORIGIN,
            HeaderName::from_static("x-requested-with"),
            CONTENT_TYPE,
            ACCEPT,
            AUTHORIZATION,
            RANGE,
        ])
        .expose_headers([
            CONTENT_DISPOSITION,
            CONTENT_LENGTH,
            CONTENT_TYPE,
            ACCEPT_RANGES,
            CONTENT_RANGE,
        ])
        .max_age(MAX_AGE)
}

/// Origin for requests that carry none but reached the relay through a
/// loopback `Host`, such as curl or a native client on the same machine.
pub async fn loopback_fallback(
    State(resolver): State<Arc<OriginResolver>>,
    request: Request,
    next: Next,
) -> Response {
    let fallback = if request.headers().contains_key(ORIGIN) {
        None
    } else {
        resolver
            .resolve(None, header_str(request.headers(), &HOST))
            .allowed_origin()
            .and_then(|origin| HeaderValue::from_str(origin).ok())
    };

    let mut response = next.run(request).await;
    if let Some(origin) = fallback {
        response
            .headers_mut()
            .entry(ACCESS_CONTROL_ALLOW_ORIGIN)
            .or_insert(origin);
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        http::header::{
            ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_METHOD,
        },
        middleware::from_fn_with_state,
        routing::get,
    };
    use tokio::net::TcpListener;

    use super::*;

    async fn serve() -> String {
        let resolver = Arc::new(OriginResolver::new(["http://localhost:3000", "null"]));
        let app = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(from_fn_with_state(resolver.clone(), loopback_fallback))
            .layer(cors_layer(resolver));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn get_with(base: &str, origin: Option<&str>) -> reqwest::Response {
        let mut request = reqwest::Client::new().get(format!("{base}/ping"));
        if let Some(origin) = origin {
            request = request.header(ORIGIN, origin);
        }
        request.send().await.unwrap()
    }

    #[tokio::test]
    async fn test_allowed_origin_is_echoed() {
        let base = serve().await;
        let response = get_with(&base, Some("http://localhost:3000")).await;
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );

        let response = get_with(&base, Some("null")).await;
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "null");
    }

    #[tokio::test]
    async fn test_blocked_origin_gets_no_allow_origin() {
        let base = serve().await;
        let response = get_with(&base, Some("http://evil.example")).await;
        assert_eq!(response.status(), 200);
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_loopback_host_without_origin() {
        let base = serve().await;
        let response = get_with(&base, None).await;
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], base.as_str());
    }

    #[tokio::test]
    async fn test_preflight_headers() {
        let base = serve().await;
        let response = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, format!("{base}/ping"))
            .header(ORIGIN, "null")
            .header(ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        let headers = response.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "null");
        assert!(
            headers[ACCESS_CONTROL_ALLOW_METHODS]
                .to_str()
                .unwrap()
                .contains("GET")
        );
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "600");
    }
}
