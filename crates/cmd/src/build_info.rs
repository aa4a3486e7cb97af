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

/// Package author information from Cargo.toml
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Returns true if this is an official release build
/// (`ARTIFACT_RELAY_RELEASE` env var is set at compile time)
const fn is_official_release() -> bool { option_env!("ARTIFACT_RELAY_RELEASE").is_some() }

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Full version string
///
/// For official releases: `PKG_VERSION` as-is.
/// For development builds: `PKG_VERSION` with an "-unofficial" suffix.
pub const FULL_VERSION: &str = if is_official_release() {
    PKG_VERSION
} else {
    concat!(env!("CARGO_PKG_VERSION"), "-unofficial")
};
