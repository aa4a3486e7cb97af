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

use artifact_relay_error::{ErrorCode, ErrorExt, StackError};
use snafu::Snafu;

/// Failure of the upstream request before any byte was relayed.
///
/// Display strings are written for end users; they never include upstream
/// bodies or socket details.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum UpstreamError {
    #[snafu(display(
        "The access token is invalid or expired. Please check your token and try again."
    ))]
    Unauthorized,

    #[snafu(display("Your token does not have permission to access this file."))]
    Forbidden,

    #[snafu(display("The requested file was not found in Artifactory."))]
    NotFound,

    #[snafu(display("Unable to connect to Artifactory. Please check your network connection."))]
    Unreachable { source: reqwest::Error },

    #[snafu(display("Artifactory answered with status {status}"))]
    UnexpectedStatus { status: u16 },

    #[snafu(display("Request to Artifactory failed"))]
    Transport { source: reqwest::Error },

    #[snafu(display("Artifactory sent a response that could not be read"))]
    InvalidResponse { source: reqwest::Error },
}

impl UpstreamError {
    /// Classify a `send()` failure: connection and DNS problems mean the
    /// repository is unreachable, everything else is a generic transport
    /// failure.
    pub fn from_send(source: reqwest::Error) -> Self {
        if source.is_connect() {
            Self::Unreachable { source }
        } else {
            Self::Transport { source }
        }
    }

    /// Map a non-success upstream status.
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            status => Self::UnexpectedStatus { status },
        }
    }
}

impl StackError for UpstreamError {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) {
        match self {
            Self::Unreachable { source }
            | Self::Transport { source }
            | Self::InvalidResponse { source } => {
                buf.push(format!("{layer}: {self}, source: {source:?}"));
            }
            _ => buf.push(format!("{layer}: {self}")),
        }
    }

    fn next(&self) -> Option<&dyn StackError> { None }
}

impl ErrorExt for UpstreamError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::Unauthorized => ErrorCode::InvalidToken,
            Self::Forbidden => ErrorCode::AccessDenied,
            Self::NotFound => ErrorCode::FileNotFound,
            Self::Unreachable { .. } => ErrorCode::ConnectionError,
            Self::UnexpectedStatus { .. }
            | Self::Transport { .. }
            | Self::InvalidResponse { .. } => ErrorCode::UnknownError,
        }
    }

    fn as_any(&self) -> &dyn Any { self as _ }
}
