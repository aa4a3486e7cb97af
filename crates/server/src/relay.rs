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

//! Upstream-to-client byte pipe.
//!
//! [`RelayBody`] owns the upstream body for the lifetime of one download.
//! Hyper polls it only when the client socket can take more bytes, so a slow
//! reader throttles the upstream read. When hyper drops it (client gone, or
//! server shutting down) the upstream stream is dropped with it, which closes
//! the upstream connection.

use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use artifact_relay_proxy::ByteStream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{Span, info, warn};

use crate::metrics;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    /// Upstream reached its natural end.
    Completed,
    /// Upstream failed after headers were sent.
    Aborted,
    /// Dropped before the end: a client disconnect, or cut off at shutdown.
    Cancelled,
}

pub struct RelayBody {
    head:     Option<Bytes>,
    upstream: ByteStream,
    expected: Option<u64>,
    relayed:  u64,
    outcome:  Option<Outcome>,
    span:     Span,
}

impl RelayBody {
    /// `head` is the chunk already pulled off `upstream` before the response
    /// headers were committed.
    pub fn new(head: Option<Bytes>, upstream: ByteStream, expected: Option<u64>) -> Self {
        metrics::ACTIVE_DOWNLOADS.inc();
        Self {
            head,
            upstream,
            expected,
            relayed: 0,
            outcome: None,
            span: Span::current(),
        }
    }

    fn forward(&mut self, chunk: Bytes) -> Poll<Option<reqwest::Result<Bytes>>> {
        let len = chunk.len() as u64;
        self.relayed += len;
        metrics::BYTES_RELAYED.inc_by(len);
        Poll::Ready(Some(Ok(chunk)))
    }

    fn finish(&mut self, outcome: Outcome, cause: Option<&reqwest::Error>) {
        if self.outcome.is_some() {
            return;
        }
        self.outcome = Some(outcome);
        metrics::RELAY_OUTCOMES
            .with_label_values(&[outcome.as_ref()])
            .inc();

        let _entered = self.span.enter();
        let relayed = self.relayed;
        match (outcome, cause) {
            (Outcome::Completed, _) => match self.expected {
                Some(expected) if expected != relayed => {
                    warn!(relayed, expected, "relay completed with a length mismatch");
                }
                _ => info!(relayed, "relay completed"),
            },
            (Outcome::Aborted, Some(err)) => {
                warn!(relayed, error = %err, "relay aborted by upstream error");
            }
            (Outcome::Aborted, None) => warn!(relayed, "relay aborted"),
            (Outcome::Cancelled, _) => info!(relayed, "relay cancelled before completion"),
        }
    }
}

impl Stream for RelayBody {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(head) = this.head.take() {
            return this.forward(head);
        }
        if this.outcome.is_some() {
            return Poll::Ready(None);
        }

        match ready!(this.upstream.poll_next_unpin(cx)) {
            Some(Ok(chunk)) => this.forward(chunk),
            Some(Err(err)) => {
                this.finish(Outcome::Aborted, Some(&err));
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.finish(Outcome::Completed, None);
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for RelayBody {
    fn drop(&mut self) {
        self.finish(Outcome::Cancelled, None);
        metrics::ACTIVE_DOWNLOADS.dec();
    }
}
