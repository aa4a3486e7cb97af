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

use std::any::Any;

use artifact_relay_error::{ErrorCode, ErrorExt, StackError, format_stack};
use artifact_relay_proxy::{Rejection, UpstreamError};
use axum::{
    Json,
    http::{HeaderValue, header},
    response::IntoResponse,
};
use serde::Serialize;
use snafu::Snafu;

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error:   &'static str,
    pub message: String,
    pub code:    ErrorCode,
}

/// Failures detected before response headers are committed.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ApiError {
    #[snafu(display("Please provide a valid access token as 'Authorization: Bearer <token>'."))]
    MissingAuth,

    #[snafu(display("The requested filename is not allowed: {reason}."))]
    InvalidFilename { reason: Rejection },

    #[snafu(context(false), display("{source}"))]
    Upstream { source: UpstreamError },

    /// The upstream body failed before its first byte reached the client.
    #[snafu(display("Upstream body failed before the first byte"))]
    EarlyStreamFailure { source: reqwest::Error },

    /// The access-token API refused or failed the lookup.
    #[snafu(display("{}", token_lookup_message(source)))]
    TokenLookup { source: UpstreamError },

    #[snafu(display("Too many requests, please try again later."))]
    RateLimited { retry_after_secs: u64 },

    #[snafu(display("Failed to encode metrics"))]
    EncodeMetrics { source: prometheus::Error },
}

const fn token_lookup_message(source: &UpstreamError) -> &'static str {
    match source {
        UpstreamError::Unauthorized => {
            "The access token is invalid or expired. Please check your token and try again."
        }
        UpstreamError::Forbidden => "Your token is not allowed to read its own attributes.",
        UpstreamError::Unreachable { .. } => {
            "Unable to connect to Artifactory. Please check your network connection."
        }
        _ => "Token attributes request failed",
    }
}

impl ErrorExt for ApiError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::MissingAuth => ErrorCode::MissingAuth,
            Self::InvalidFilename { .. } => ErrorCode::InvalidFilename,
            Self::Upstream { source } => source.error_code(),
            Self::EarlyStreamFailure { .. } => ErrorCode::UnknownError,
            Self::TokenLookup { source } => match source.error_code() {
                code @ (ErrorCode::InvalidToken
                | ErrorCode::AccessDenied
                | ErrorCode::ConnectionError) => code,
                _ => ErrorCode::TokenLookupFailed,
            },
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::EncodeMetrics { .. } => ErrorCode::Internal,
        }
    }

    fn as_any(&self) -> &dyn Any { self as _ }
}

impl StackError for ApiError {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) {
        match self {
            Self::EarlyStreamFailure { source } => {
                buf.push(format!("{layer}: {self}, source: {source:?}"));
            }
            Self::TokenLookup { source } => {
                buf.push(format!("{layer}: {self}, source: {source:?}"));
            }
            Self::EncodeMetrics { source } => {
                buf.push(format!("{layer}: {self}, source: {source}"));
            }
            _ => buf.push(format!("{layer}: {self}")),
        }
    }

    fn next(&self) -> Option<&dyn StackError> {
        match self {
            Self::Upstream { source } => Some(source),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let code = self.error_code();
        if code.is_opaque() {
            tracing::warn!(code = code.as_ref(), stack = %format_stack(&self), "request failed");
        } else {
            tracing::info!(code = code.as_ref(), reason = %self, "request refused");
        }

        let body = Json(ErrorBody {
            error: code.title(),
            message: self.output_msg(),
            code,
        });
        let mut response = (code.http_status(), body).into_response();
        if let Self::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use axum::{body::to_bytes, http::StatusCode};

    use super::*;

    async fn render(err: ApiError) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_not_found_body() {
        let (status, _, body) = render(UpstreamError::NotFound.into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "File not found");
        assert_eq!(body["code"], "FILE_NOT_FOUND");
        assert_eq!(
            body["message"],
            "The requested file was not found in Artifactory."
        );
    }

    #[tokio::test]
    async fn test_missing_auth_body() {
        let (status, _, body) = render(ApiError::MissingAuth).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "MISSING_AUTH");
    }

    #[tokio::test]
    async fn test_invalid_filename_carries_reason() {
        let (status, _, body) = render(ApiError::InvalidFilename {
            reason: Rejection::PathTraversal,
        })
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_FILENAME");
        assert!(body["message"].as_str().unwrap().contains("relative path"));
    }

    #[tokio::test]
    async fn test_opaque_errors_hide_details() {
        let (status, _, body) = render(UpstreamError::from_status(502).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "UNKNOWN_ERROR");
        assert_eq!(body["error"], "Download failed");
        assert!(!body["message"].as_str().unwrap().contains("502"));
    }

    #[tokio::test]
    async fn test_token_lookup_codes() {
        let (status, _, body) = render(ApiError::TokenLookup {
            source: UpstreamError::Unauthorized,
        })
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "INVALID_TOKEN");

        let (status, _, body) = render(ApiError::TokenLookup {
            source: UpstreamError::NotFound,
        })
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "TOKEN_LOOKUP_FAILED");
        assert_eq!(body["error"], "Token attributes request failed");
        assert!(!body["message"].as_str().unwrap().contains("file"));
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let (status, headers, body) = render(ApiError::RateLimited {
            retry_after_secs: 42,
        })
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "RATE_LIMITED");
        assert_eq!(headers.get(header::RETRY_AFTER).unwrap(), "42");
    }
}
