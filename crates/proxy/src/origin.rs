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

//! CORS origin negotiation.
//!
//! `Origin` is attacker-controlled and is only ever echoed when it is an
//! exact member of the configured allow-list.

use std::collections::HashSet;

use crate::config::ProxyConfig;

/// Hostnames treated as the relay's own machine.
const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1"];

/// Outcome of origin negotiation for one request.
///
/// `None` means no `Access-Control-Allow-Origin` header is emitted. The
/// request itself still runs; the browser just refuses to hand the response
/// to the calling page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CorsDecision {
    allowed_origin: Option<String>,
}

impl CorsDecision {
    pub const fn blocked() -> Self {
        Self {
            allowed_origin: None,
        }
    }

    pub fn allow(origin: impl Into<String>) -> Self {
        Self {
            allowed_origin: Some(origin.into()),
        }
    }

    pub fn allowed_origin(&self) -> Option<&str> { self.allowed_origin.as_deref() }

    pub const fn is_allowed(&self) -> bool { self.allowed_origin.is_some() }
}

#[derive(Clone, Debug)]
pub struct OriginResolver {
    allowed: HashSet<String>,
}

impl OriginResolver {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self { Self::new(config.allowed_origins.clone()) }

    /// Decide which origin, if any, may read the response.
    ///
    /// 1. An allow-listed `Origin` is echoed exactly.
    /// 2. Without `Origin`, a loopback `Host` (curl, native clients on the
    ///    same machine) is answered with `http://<host>`.
    /// 3. Everything else is blocked.
    pub fn resolve(&self, origin: Option<&str>, host: Option<&str>) -> CorsDecision {
        match origin {
            Some(origin) if self.allowed.contains(origin) => CorsDecision::allow(origin),
            Some(_) => CorsDecision::blocked(),
            None => match host {
                Some(host) if is_loopback_host(host) => CorsDecision::allow(format!("http://{host}")),
                _ => CorsDecision::blocked(),
            },
        }
    }
}

/// `localhost` or `127.0.0.1`, with an optional numeric port.
fn is_loopback_host(host: &str) -> bool {
    let name = match host.split_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        Some(_) => return false,
        None => host,
    };
    LOOPBACK_HOSTS.contains(&name)
}
