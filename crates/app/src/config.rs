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

//! Layered application configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML
//! file, `ARTIFACT_RELAY__*` environment variables, and the legacy
//! `ARTIFACTORY_URL` / `PORT` variables of older deployments.

use std::{
    collections::HashMap,
    net::{AddrParseError, SocketAddr},
    num::ParseIntError,
    path::{Path, PathBuf},
};

use artifact_relay_common_runtime::RuntimeOptions;
use artifact_relay_common_telemetry::logging::LoggingOptions;
use artifact_relay_proxy::ProxyConfig;
use artifact_relay_server::{http::RestServerConfig, rate_limit::RateLimitConfig};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

pub const ENV_PREFIX: &str = "ARTIFACT_RELAY";
const ENV_SEPARATOR: &str = "__";
const LEGACY_ARTIFACTORY_URL: &str = "ARTIFACTORY_URL";
const LEGACY_PORT: &str = "PORT";
const LIST_KEYS: &[&str] = &["proxy.allowed_origins", "proxy.allowed_extensions"];

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigLoadError {
    #[snafu(display("Config file {} does not exist", path.display()))]
    MissingFile { path: PathBuf },

    #[snafu(display("Failed to load configuration"))]
    Load { source: config::ConfigError },

    #[snafu(display("Legacy {LEGACY_PORT} value {value:?} is not a port number"))]
    LegacyPort {
        value:  String,
        source: ParseIntError,
    },

    #[snafu(display("Invalid proxy configuration"))]
    Proxy {
        source: artifact_relay_proxy::ConfigError,
    },

    #[snafu(display("Invalid bind address {addr}"))]
    BindAddress {
        addr:   String,
        source: AddrParseError,
    },
}

/// Configuration for the application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(default)]
pub struct AppConfig {
    /// REST server configuration
    #[builder(default)]
    pub http:       RestServerConfig,
    #[builder(default)]
    pub proxy:      ProxyConfig,
    #[builder(default)]
    pub rate_limit: RateLimitConfig,
    #[builder(default)]
    pub logging:    LoggingOptions,
    #[builder(default)]
    pub runtime:    RuntimeOptions,
}

impl AppConfig {
    /// Load from the process environment, after reading `.env` if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let _ = dotenvy::dotenv();
        Self::load_with_env(path, std::env::vars().collect())
    }

    /// Load with `env` standing in for the process environment.
    pub fn load_with_env(
        path: Option<&Path>,
        env: HashMap<String, String>,
    ) -> Result<Self, ConfigLoadError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            ensure!(path.is_file(), MissingFileSnafu { path });
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        if let Some(url) = env.get(LEGACY_ARTIFACTORY_URL) {
            builder = builder
                .set_override("proxy.artifactory_url", url.as_str())
                .context(LoadSnafu)?;
        }
        if let Some(value) = env.get(LEGACY_PORT) {
            let port: u16 = value
                .trim()
                .parse()
                .context(LegacyPortSnafu { value })?;
            builder = builder
                .set_override("http.bind_address", format!("0.0.0.0:{port}"))
                .context(LoadSnafu)?;
        }

        let environment = LIST_KEYS.iter().fold(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .list_separator(",")
                .try_parsing(true),
            |environment, key| environment.with_list_parse_key(key),
        );
        builder = builder.add_source(environment.source(Some(env)));

        let config: Self = builder
            .build()
            .context(LoadSnafu)?
            .try_deserialize()
            .context(LoadSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server could not start with.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        self.proxy.repository_base().context(ProxySnafu)?;
        self.http
            .bind_address
            .parse::<SocketAddr>()
            .context(BindAddressSnafu {
                addr: self.http.bind_address.clone(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = AppConfig::load_with_env(None, HashMap::new()).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.http.bind_address, "127.0.0.1:3000");
        assert_eq!(config.proxy.max_filename_len, 200);
        assert_eq!(config.rate_limit.download.max_requests, 100);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = toml_file(
            r#"
[http]
bind_address = "0.0.0.0:8080"
shutdown_timeout = "5s"

[proxy]
artifactory_url = "https://repo.example.com/artifactory/"
allowed_origins = ["https://portal.example.com"]
connect_timeout = "3s"

[rate_limit.download]
window = "1m"
max_requests = 5
"#,
        );
        let config = AppConfig::load_with_env(Some(file.path()), HashMap::new()).unwrap();
        assert_eq!(config.http.bind_address, "0.0.0.0:8080");
        assert_eq!(config.http.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(
            config.proxy.artifactory_url,
            "https://repo.example.com/artifactory/"
        );
        assert_eq!(config.proxy.allowed_origins, vec![
            "https://portal.example.com".to_string()
        ]);
        assert_eq!(config.proxy.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.rate_limit.download.window, Duration::from_secs(60));
        assert_eq!(config.rate_limit.download.max_requests, 5);
        // Untouched sections keep their defaults.
        assert_eq!(config.rate_limit.auth.max_requests, 20);
        assert_eq!(config.proxy.repository_path, "download");
    }

    #[test]
    fn test_prefixed_environment() {
        let config = AppConfig::load_with_env(
            None,
            env(&[
                ("ARTIFACT_RELAY__PROXY__REPOSITORY_PATH", "releases"),
                ("ARTIFACT_RELAY__RATE_LIMIT__ENABLED", "false"),
                (
                    "ARTIFACT_RELAY__PROXY__ALLOWED_ORIGINS",
                    "http://a.example,http://b.example",
                ),
                ("UNRELATED", "ignored"),
            ]),
        )
        .unwrap();
        assert_eq!(config.proxy.repository_path, "releases");
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.proxy.allowed_origins, vec![
            "http://a.example".to_string(),
            "http://b.example".to_string()
        ]);
    }

    #[test]
    fn test_legacy_variables_win() {
        let file = toml_file("[http]\nbind_address = \"127.0.0.1:9000\"\n");
        let config = AppConfig::load_with_env(
            Some(file.path()),
            env(&[
                ("ARTIFACTORY_URL", "https://legacy.example.com/artifactory/"),
                (
                    "ARTIFACT_RELAY__PROXY__ARTIFACTORY_URL",
                    "https://prefixed.example.com/artifactory/",
                ),
                ("PORT", "8080"),
            ]),
        )
        .unwrap();
        assert_eq!(
            config.proxy.artifactory_url,
            "https://legacy.example.com/artifactory/"
        );
        assert_eq!(config.http.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_bad_legacy_port() {
        let err = AppConfig::load_with_env(None, env(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigLoadError::LegacyPort { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err =
            AppConfig::load_with_env(Some(Path::new("/nonexistent/relay.toml")), HashMap::new())
                .unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingFile { .. }));
    }

    #[test]
    fn test_invalid_upstream_rejected() {
        let err = AppConfig::load_with_env(
            None,
            env(&[("ARTIFACTORY_URL", "ftp://repo.example.com/")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Proxy { .. }));
    }
}
