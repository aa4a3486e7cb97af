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

//! Building blocks of the download proxy: everything that can be decided
//! about a request without touching the HTTP server, plus the client that
//! talks to the artifact repository and its access-token API.

pub mod config;
pub mod error;
pub mod filename;
pub mod origin;
pub mod range;
pub mod token;
pub mod upstream;

pub use config::{ConfigError, ProxyConfig};
pub use error::UpstreamError;
pub use filename::{FilenameValidator, Rejection, ValidationResult, last_segment};
pub use origin::{CorsDecision, OriginResolver};
pub use range::{ByteRange, forwarded_range, parse_range};
pub use token::TokenAttributes;
pub use upstream::{ByteStream, UpstreamClient, UpstreamResponse};
