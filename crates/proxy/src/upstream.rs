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

use std::fmt;

use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use reqwest::{
    StatusCode,
    header::{ACCEPT, CONTENT_LENGTH, CONTENT_RANGE, HeaderValue, RANGE},
};
use snafu::ResultExt;
use tracing::{debug, instrument};
use url::Url;

use crate::{
    config::{BuildClientSnafu, ConfigError, ProxyConfig},
    error::{InvalidResponseSnafu, UpstreamError},
    token::{TokenAttributes, TokenListing},
};

/// Body of an upstream response: finite, not restartable, read at most once.
pub type ByteStream = BoxStream<'static, reqwest::Result<Bytes>>;

/// A live upstream reply whose body has not been read yet.
pub struct UpstreamResponse {
    status:         StatusCode,
    content_length: Option<u64>,
    content_range:  Option<HeaderValue>,
    body:           ByteStream,
}

impl UpstreamResponse {
    pub fn is_partial(&self) -> bool { self.status == StatusCode::PARTIAL_CONTENT }

    pub const fn content_length(&self) -> Option<u64> { self.content_length }

    pub const fn content_range(&self) -> Option<&HeaderValue> { self.content_range.as_ref() }

    /// Hand over the body. Dropping the returned stream closes the upstream
    /// connection.
    pub fn into_body(self) -> ByteStream { self.body }
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

/// Authenticated client for the artifact repository.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base:   Url,
    tokens: Url,
}

impl UpstreamClient {
    pub fn new(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let base = config.repository_base()?;
        let tokens = config.tokens_url()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("artifact-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(BuildClientSnafu)?;
        Ok(Self {
            client,
            base,
            tokens,
        })
    }

    pub const fn base(&self) -> &Url { &self.base }

    /// Upstream location of an already validated `filename`.
    ///
    /// Only the path is derived from the request; scheme, host and the
    /// repository prefix always come from configuration. Each path segment
    /// is percent-encoded separately.
    pub fn artifact_url(&self, filename: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(filename.split('/'));
        }
        url
    }

    /// Issue the authenticated GET and wait for the response head.
    ///
    /// `range` is sent as the `Range` header when present. The body is left
    /// unread so the caller can relay it incrementally.
    #[instrument(skip_all, fields(path = %url.path(), range = range.unwrap_or("-")))]
    pub async fn fetch(
        &self,
        url: Url,
        bearer_token: &str,
        range: Option<&str>,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut request = self
            .client
            .get(url)
            .bearer_auth(bearer_token)
            .header(ACCEPT, "*/*");
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }

        let response = request.send().await.map_err(UpstreamError::from_send)?;
        let status = response.status();
        debug!(status = status.as_u16(), "upstream responded");
        if !status.is_success() {
            return Err(UpstreamError::from_status(status.as_u16()));
        }

        let headers = response.headers();
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let content_range = headers.get(CONTENT_RANGE).cloned();

        Ok(UpstreamResponse {
            status,
            content_length,
            content_range,
            body: response.bytes_stream().boxed(),
        })
    }

    /// Ask the access-token API which tokens `bearer_token` can see,
    /// authenticating with that same token.
    #[instrument(skip_all, fields(path = %self.tokens.path()))]
    pub async fn token_attributes(
        &self,
        bearer_token: &str,
    ) -> Result<Vec<TokenAttributes>, UpstreamError> {
        let response = self
            .client
            .get(self.tokens.clone())
            .bearer_auth(bearer_token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(UpstreamError::from_send)?;
        let status = response.status();
        debug!(status = status.as_u16(), "token API responded");
        if !status.is_success() {
            return Err(UpstreamError::from_status(status.as_u16()));
        }

        let listing: TokenListing = response.json().await.context(InvalidResponseSnafu)?;
        Ok(listing.into_tokens())
    }
}
