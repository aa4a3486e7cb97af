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

use std::sync::Arc;

use artifact_relay_proxy::{
    ConfigError, FilenameValidator, OriginResolver, ProxyConfig, UpstreamClient,
};

use crate::rate_limit::{RateLimitConfig, RateLimiter};

/// Shared, read-only state behind every request.
///
/// Built once from configuration; request handling never mutates it apart
/// from the rate limiter's window table.
#[derive(Clone, Debug)]
pub struct RelayState {
    pub validator: Arc<FilenameValidator>,
    pub origins:   Arc<OriginResolver>,
    pub upstream:  UpstreamClient,
    pub limiter:   Arc<RateLimiter>,
}

impl RelayState {
    pub fn new(proxy: &ProxyConfig, rate_limit: RateLimitConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            validator: Arc::new(FilenameValidator::from_config(proxy)),
            origins:   Arc::new(OriginResolver::from_config(proxy)),
            upstream:  UpstreamClient::new(proxy)?,
            limiter:   Arc::new(RateLimiter::new(rate_limit)),
        })
    }
}
