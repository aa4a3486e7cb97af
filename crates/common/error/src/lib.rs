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

//! Error taxonomy shared by every artifact-relay crate.
//!
//! [`ErrorCode`] is the stable, machine-readable `code` field clients see in
//! JSON error bodies. Each variant carries its HTTP status and a short human
//! title as enum properties so mapping never drifts between crates. Codes
//! whose cause must stay hidden also carry the fixed message shown instead.

use std::{any::Any, error::Error as StdError};

use http::StatusCode as HttpStatusCode;
use serde::Serialize;
use strum::EnumProperty;

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    strum_macros::AsRefStr,
    strum_macros::EnumIter,
    strum_macros::EnumProperty,
    strum_macros::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    #[strum(props(http_status = "401", title = "Access token required"))]
    MissingAuth,
    #[strum(props(http_status = "400", title = "Invalid filename"))]
    InvalidFilename,
    #[strum(props(http_status = "401", title = "Authentication failed"))]
    InvalidToken,
    #[strum(props(http_status = "403", title = "Access denied"))]
    AccessDenied,
    #[strum(props(http_status = "404", title = "File not found"))]
    FileNotFound,
    #[strum(props(http_status = "503", title = "Service unavailable"))]
    ConnectionError,
    #[strum(props(http_status = "429", title = "Too many requests"))]
    RateLimited,
    #[strum(props(
        http_status = "502",
        title = "Token attributes request failed",
        opaque_message = "Token attributes could not be retrieved. Please try again."
    ))]
    TokenLookupFailed,
    #[strum(props(
        http_status = "500",
        title = "Download failed",
        opaque_message = "An unexpected error occurred while downloading the file. Please try again."
    ))]
    UnknownError,
    #[strum(props(
        http_status = "500",
        title = "Internal error",
        opaque_message = "An internal error occurred. Please try again."
    ))]
    Internal,
}

impl ErrorCode {
    pub fn http_status(self) -> HttpStatusCode {
        self.get_str("http_status")
            .and_then(|value| value.parse::<u16>().ok())
            .and_then(|value| HttpStatusCode::from_u16(value).ok())
            .unwrap_or(HttpStatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Short human-readable summary rendered as the `error` field.
    pub fn title(self) -> &'static str { self.get_str("title").unwrap_or("Internal error") }

    /// Fixed client message for codes whose underlying cause must stay
    /// hidden.
    pub fn opaque_message(self) -> Option<&'static str> { self.get_str("opaque_message") }

    pub fn is_opaque(self) -> bool { self.opaque_message().is_some() }
}

pub trait StackError: StdError {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>);

    fn next(&self) -> Option<&dyn StackError>;

    fn last(&self) -> &dyn StackError
    where
        Self: Sized,
    {
        let Some(mut result) = self.next() else {
            return self;
        };
        while let Some(err) = result.next() {
            result = err;
        }
        result
    }
}

pub trait ErrorExt: StackError {
    fn error_code(&self) -> ErrorCode { ErrorCode::UnknownError }

    fn as_any(&self) -> &dyn Any;

    /// Message safe to hand to a client.
    ///
    /// Opaque codes get their fixed message so that upstream bodies, socket
    /// errors and similar details never reach the response.
    fn output_msg(&self) -> String
    where
        Self: Sized,
    {
        match self.error_code().opaque_message() {
            Some(message) => message.to_string(),
            None => self.last().to_string(),
        }
    }
}

/// Renders the whole stack of `err` one layer per line, for logs.
pub fn format_stack(err: &dyn StackError) -> String {
    let mut buf = Vec::new();
    let mut layer = 0;
    let mut current = Some(err);
    while let Some(e) = current {
        e.debug_fmt(layer, &mut buf);
        layer += 1;
        current = e.next();
    }
    buf.join("\n")
}
