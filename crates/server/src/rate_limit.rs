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

//! Fixed-window request budgets per client address and endpoint class.
//!
//! Sits in front of every handler. A client that exhausts the budget of a
//! class gets `429 RATE_LIMITED` until its window rolls over; other classes
//! are unaffected.
//!
//! The per-client table is capped at `max_tracked_clients`. Once it is full
//! and a sweep frees nothing, newcomers share one overflow window per class
//! until tracked windows expire.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{error::ApiError, metrics};

const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

/// Minimum spacing between sweeps of a full table.
const SWEEP_INTERVAL_MS: u64 = 1_000;

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::AsRefStr, strum_macros::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum EndpointClass {
    General,
    Auth,
    Download,
    Api,
}

impl EndpointClass {
    pub fn for_path(path: &str) -> Self {
        let under = |prefix: &str| {
            path.strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        };
        if under("/download") {
            Self::Download
        } else if path.starts_with("/token") || under("/auth") {
            Self::Auth
        } else if under("/api") {
            Self::Api
        } else {
            Self::General
        }
    }
}

/// At most `max_requests` per `window`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPolicy {
    #[serde(with = "humantime_serde")]
    pub window:       Duration,
    pub max_requests: u32,
}

impl WindowPolicy {
    pub const fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SmartDefault, bon::Builder)]
#[serde(default)]
pub struct RateLimitConfig {
    #[default = true]
    #[builder(default = true)]
    pub enabled:             bool,
    /// Upper bound on per-client windows. Concurrent first requests may
    /// overshoot it by the number of requests in flight.
    #[default = 10_000]
    #[builder(default = 10_000)]
    pub max_tracked_clients: usize,
    #[default(WindowPolicy::new(FIFTEEN_MINUTES, 1000))]
    #[builder(default = WindowPolicy::new(FIFTEEN_MINUTES, 1000))]
    pub general:             WindowPolicy,
    #[default(WindowPolicy::new(FIFTEEN_MINUTES, 20))]
    #[builder(default = WindowPolicy::new(FIFTEEN_MINUTES, 20))]
    pub auth:                WindowPolicy,
    #[default(WindowPolicy::new(FIFTEEN_MINUTES, 100))]
    #[builder(default = WindowPolicy::new(FIFTEEN_MINUTES, 100))]
    pub download:            WindowPolicy,
    #[default(WindowPolicy::new(FIFTEEN_MINUTES, 300))]
    #[builder(default = WindowPolicy::new(FIFTEEN_MINUTES, 300))]
    pub api:                 WindowPolicy,
}

impl RateLimitConfig {
    pub const fn policy(&self, class: EndpointClass) -> WindowPolicy {
        match class {
            EndpointClass::General => self.general,
            EndpointClass::Auth => self.auth,
            EndpointClass::Download => self.download,
            EndpointClass::Api => self.api,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed { limit: u32, remaining: u32 },
    Limited { retry_after: Duration },
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count:   u32,
}

impl Window {
    const fn new(started: Instant) -> Self { Self { started, count: 0 } }

    fn count(&mut self, policy: WindowPolicy, now: Instant) -> Decision {
        if now.saturating_duration_since(self.started) >= policy.window {
            self.started = now;
            self.count = 0;
        }
        if self.count >= policy.max_requests {
            let retry_after = policy
                .window
                .saturating_sub(now.saturating_duration_since(self.started));
            return Decision::Limited { retry_after };
        }
        self.count += 1;
        Decision::Allowed {
            limit:     policy.max_requests,
            remaining: policy.max_requests - self.count,
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    config:        RateLimitConfig,
    windows:       DashMap<(IpAddr, EndpointClass), Window>,
    /// Shared by clients that arrive while `windows` is full.
    overflow:      DashMap<EndpointClass, Window>,
    epoch:         Instant,
    /// Milliseconds after `epoch` before which a full table is not swept.
    next_sweep_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            overflow: DashMap::new(),
            epoch: Instant::now(),
            next_sweep_ms: AtomicU64::new(0),
        }
    }

    pub const fn is_enabled(&self) -> bool { self.config.enabled }

    /// Count one request from `client` against `class`.
    pub fn check(&self, client: IpAddr, class: EndpointClass) -> Decision {
        self.check_at(client, class, Instant::now())
    }

    fn check_at(&self, client: IpAddr, class: EndpointClass, now: Instant) -> Decision {
        let policy = self.config.policy(class);
        if !self.config.enabled {
            return Decision::Allowed {
                limit:     policy.max_requests,
                remaining: policy.max_requests,
            };
        }

        let key = (client, class);
        if !self.windows.contains_key(&key) && self.is_full() {
            self.sweep_if_due(now);
            if self.is_full() {
                debug!(%client, class = class.as_ref(), "client table full, using overflow window");
                return self
                    .overflow
                    .entry(class)
                    .or_insert_with(|| Window::new(now))
                    .count(policy, now);
            }
        }

        self.windows
            .entry(key)
            .or_insert_with(|| Window::new(now))
            .count(policy, now)
    }

    fn is_full(&self) -> bool { self.windows.len() >= self.config.max_tracked_clients }

    /// Sweep at most once per [`SWEEP_INTERVAL_MS`]; concurrent callers that
    /// lose the race skip it.
    fn sweep_if_due(&self, now: Instant) {
        let now_ms = u64::try_from(now.saturating_duration_since(self.epoch).as_millis())
            .unwrap_or(u64::MAX);
        let due = self.next_sweep_ms.load(Ordering::Acquire);
        if now_ms < due {
            return;
        }
        let next = now_ms.saturating_add(SWEEP_INTERVAL_MS);
        if self
            .next_sweep_ms
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.sweep(now);
        }
    }

    fn sweep(&self, now: Instant) {
        self.windows.retain(|(_, class), window| {
            now.saturating_duration_since(window.started) < self.config.policy(*class).window
        });
    }

    pub fn tracked(&self) -> usize { self.windows.len() }
}

/// Middleware gate; keyed by the peer address from `ConnectInfo`.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let class = EndpointClass::for_path(request.uri().path());
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |info| info.0.ip());

    match limiter.check(client, class) {
        Decision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
            response
        }
        Decision::Limited { retry_after } => {
            metrics::RATE_LIMITED
                .with_label_values(&[class.as_ref()])
                .inc();
            warn!(%client, class = class.as_ref(), "rate limit exceeded");
            let retry_after_secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            ApiError::RateLimited { retry_after_secs }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;

    fn limiter(max: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(
            RateLimitConfig::builder()
                .download(WindowPolicy::new(window, max))
                .build(),
        )
    }

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn classifies_paths() {
        assert_eq!(EndpointClass::for_path("/download"), EndpointClass::Download);
        assert_eq!(EndpointClass::for_path("/download/x"), EndpointClass::Download);
        assert_eq!(EndpointClass::for_path("/downloads"), EndpointClass::General);
        assert_eq!(EndpointClass::for_path("/token"), EndpointClass::Auth);
        assert_eq!(EndpointClass::for_path("/token-attributes"), EndpointClass::Auth);
        assert_eq!(EndpointClass::for_path("/auth/login"), EndpointClass::Auth);
        assert_eq!(EndpointClass::for_path("/api/health"), EndpointClass::Api);
        assert_eq!(EndpointClass::for_path("/health"), EndpointClass::General);
        assert_eq!(EndpointClass::for_path("/"), EndpointClass::General);
    }

    #[test]
    fn budget_is_per_client_and_class() {
        let limiter = limiter(2, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(
            limiter.check_at(CLIENT, EndpointClass::Download, now),
            Decision::Allowed {
                limit:     2,
                remaining: 1,
            }
        );
        assert!(matches!(
            limiter.check_at(CLIENT, EndpointClass::Download, now),
            Decision::Allowed { remaining: 0, .. }
        ));
        assert!(matches!(
            limiter.check_at(CLIENT, EndpointClass::Download, now),
            Decision::Limited { .. }
        ));

        assert!(matches!(
            limiter.check_at(OTHER, EndpointClass::Download, now),
            Decision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at(CLIENT, EndpointClass::General, now),
            Decision::Allowed { .. }
        ));
    }

    #[test]
    fn window_rolls_over() {
        let limiter = limiter(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(matches!(
            limiter.check_at(CLIENT, EndpointClass::Download, now),
            Decision::Allowed { .. }
        ));
        match limiter.check_at(CLIENT, EndpointClass::Download, now + Duration::from_secs(20)) {
            Decision::Limited { retry_after } => assert_eq!(retry_after, Duration::from_secs(40)),
            other => panic!("expected limit, got {other:?}"),
        }
        assert!(matches!(
            limiter.check_at(CLIENT, EndpointClass::Download, now + Duration::from_secs(60)),
            Decision::Allowed { .. }
        ));
    }

    #[test]
    fn disabled_limiter_never_limits() {
        let limiter = RateLimiter::new(
            RateLimitConfig::builder()
                .enabled(false)
                .download(WindowPolicy::new(Duration::from_secs(60), 0))
                .build(),
        );
        for _ in 0..10 {
            assert!(matches!(
                limiter.check(CLIENT, EndpointClass::Download),
                Decision::Allowed { .. }
            ));
        }
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn expired_windows_are_swept() {
        let limiter = RateLimiter::new(
            RateLimitConfig::builder()
                .max_tracked_clients(2)
                .general(WindowPolicy::new(Duration::from_secs(10), 5))
                .build(),
        );
        let now = Instant::now();
        for last in 1..=3 {
            limiter.check_at(
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
                EndpointClass::General,
                now,
            );
        }
        assert_eq!(limiter.tracked(), 2);

        limiter.check_at(OTHER, EndpointClass::Auth, now + Duration::from_secs(11));
        // 10.0.0.2 re-entered under Auth; the stale General windows are gone.
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn table_stays_capped_under_churn() {
        let limiter = RateLimiter::new(
            RateLimitConfig::builder()
                .max_tracked_clients(100)
                .general(WindowPolicy::new(Duration::from_secs(60), 5))
                .build(),
        );
        let now = Instant::now();
        let client = |n: u32| {
            IpAddr::V6(Ipv6Addr::new(
                0x2001,
                0xdb8,
                0,
                0,
                0,
                0,
                (n >> 16) as u16,
                n as u16,
            ))
        };

        let mut allowed = 0;
        for n in 0..20_000 {
            if matches!(
                limiter.check_at(client(n), EndpointClass::General, now),
                Decision::Allowed { .. }
            ) {
                allowed += 1;
            }
            assert!(limiter.tracked() <= 100);
        }
        // 100 tracked clients plus the shared overflow budget.
        assert_eq!(allowed, 105);

        // Tracked clients keep their own budget while the table is full.
        assert!(matches!(
            limiter.check_at(client(0), EndpointClass::General, now),
            Decision::Allowed { remaining: 3, .. }
        ));

        // Once the windows expire, newcomers are tracked again.
        limiter.check_at(client(50_000), EndpointClass::General, now + Duration::from_secs(61));
        assert_eq!(limiter.tracked(), 1);
    }
}
