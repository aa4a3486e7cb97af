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

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::{ResultExt, Snafu, ensure};
use url::Url;
use validator::{Validate, ValidationErrors};

/// Origins allowed to read download responses cross-origin by default.
///
/// `"null"` is the origin browsers send for pages opened from `file://`.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:8080",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:8080",
    "null",
];

/// Archive, document and media extensions served by default.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    // archives
    "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "jar", "war", "ear", "sar", "car",
    // documents
    "pdf", "txt", "csv", "json", "xml", "md", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    // media
    "iso", "img", "dmg", "png", "jpg", "jpeg", "gif", "mp3", "mp4", "wav", "webm",
];

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("Invalid proxy configuration: {source}"))]
    Invalid { source: ValidationErrors },

    #[snafu(display("Invalid artifactory_url {url}"))]
    InvalidUrl {
        url:    String,
        source: url::ParseError,
    },

    #[snafu(display("artifactory_url must use http or https, got {scheme}"))]
    UnsupportedScheme { scheme: String },

    #[snafu(display("artifactory_url {url} cannot carry a path"))]
    CannotBeABase { url: String },

    #[snafu(display("Invalid token_api_path {path}"))]
    InvalidTokenApiPath {
        path:   String,
        source: url::ParseError,
    },

    #[snafu(display("Failed to build upstream HTTP client"))]
    BuildClient { source: reqwest::Error },
}

/// Immutable settings for the download proxy, loaded once at start-up.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Validate)]
#[serde(default)]
pub struct ProxyConfig {
    /// Base URL of the artifact repository, e.g.
    /// `https://example.jfrog.io/artifactory/`.
    #[default = "http://localhost:8081/artifactory/"]
    #[validate(url)]
    pub artifactory_url: String,

    /// Path segment(s) between the base URL and the requested filename.
    #[default = "download"]
    #[validate(length(min = 1))]
    pub repository_path: String,

    /// Exact origins echoed in `Access-Control-Allow-Origin`.
    #[default(_code = "DEFAULT_ALLOWED_ORIGINS.iter().map(ToString::to_string).collect()")]
    pub allowed_origins: Vec<String>,

    /// Extensions (without the dot) a filename may end with. Case-insensitive.
    #[default(_code = "DEFAULT_ALLOWED_EXTENSIONS.iter().map(ToString::to_string).collect()")]
    #[validate(length(min = 1))]
    pub allowed_extensions: Vec<String>,

    /// Access-token API, resolved against the host of `artifactory_url`.
    #[default = "/access/api/v1/tokens"]
    #[validate(length(min = 1))]
    pub token_api_path: String,

    #[default = 200]
    #[validate(range(min = 1, max = 4096))]
    pub max_filename_len: usize,

    /// Upper bound on establishing the upstream connection. The transfer
    /// itself is never timed out.
    #[default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl ProxyConfig {
    /// Run field validation and resolve the upstream base URL, with the
    /// repository path already appended.
    pub fn repository_base(&self) -> Result<Url, ConfigError> {
        self.validate().context(InvalidSnafu)?;

        let mut url = Url::parse(&self.artifactory_url).context(InvalidUrlSnafu {
            url: self.artifactory_url.clone(),
        })?;
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            UnsupportedSchemeSnafu {
                scheme: url.scheme().to_string(),
            }
        );

        {
            let Ok(mut segments) = url.path_segments_mut() else {
                return CannotBeABaseSnafu {
                    url: self.artifactory_url.clone(),
                }
                .fail();
            };
            segments
                .pop_if_empty()
                .extend(self.repository_path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    /// Location of the access-token API. An absolute `token_api_path`
    /// replaces the whole path of `artifactory_url`.
    pub fn tokens_url(&self) -> Result<Url, ConfigError> {
        let base = Url::parse(&self.artifactory_url).context(InvalidUrlSnafu {
            url: self.artifactory_url.clone(),
        })?;
        base.join(&self.token_api_path)
            .context(InvalidTokenApiPathSnafu {
                path: self.token_api_path.clone(),
            })
    }
}
