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

//! Filename validation for the `filename` query parameter.
//!
//! The filename is spliced into the upstream URL, so it is the one
//! client-controlled value that can steer the upstream request. Rules are
//! applied in order and the first failing one is reported.

use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;

use crate::config::ProxyConfig;

/// `scheme://` anywhere in the input.
static ABSOLUTE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9+.\-]*://").expect("valid regex"));

/// Segments of ASCII word characters, spaces, dots and dashes joined by
/// single slashes.
static PATH_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_ .\-]+(?:/[A-Za-z0-9_ .\-]+)*$").expect("valid regex")
});

/// Why a filename was refused.
#[derive(Clone, Debug, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum Rejection {
    #[display("filename is empty")]
    Empty,
    #[display("filename is longer than {max} characters")]
    TooLong { max: usize },
    #[display("filename must be a relative path without '..' or backslashes")]
    PathTraversal,
    #[display("filename must not be a URL")]
    AbsoluteUrl,
    #[display("filename contains characters outside [A-Za-z0-9_ .-/]")]
    IllegalCharacters,
    #[display("filename has no extension")]
    MissingExtension,
    #[display("file type .{extension} is not allowed")]
    ExtensionNotAllowed { extension: String },
}

pub type ValidationResult = Result<(), Rejection>;

#[derive(Clone, Debug)]
pub struct FilenameValidator {
    max_len:            usize,
    allowed_extensions: HashSet<String>,
}

impl FilenameValidator {
    pub fn new<I, S>(max_len: usize, allowed_extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            max_len,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.max_filename_len, &config.allowed_extensions)
    }

    pub fn validate(&self, name: &str) -> ValidationResult {
        if name.is_empty() {
            return Err(Rejection::Empty);
        }
        if name.chars().count() > self.max_len {
            return Err(Rejection::TooLong { max: self.max_len });
        }
        if name.contains("..") || name.starts_with('/') || name.contains('\\') {
            return Err(Rejection::PathTraversal);
        }
        if ABSOLUTE_URL.is_match(name) {
            return Err(Rejection::AbsoluteUrl);
        }
        if !PATH_GRAMMAR.is_match(name) {
            return Err(Rejection::IllegalCharacters);
        }

        let (_, extension) = last_segment(name)
            .rsplit_once('.')
            .ok_or(Rejection::MissingExtension)?;
        if extension.is_empty() {
            return Err(Rejection::MissingExtension);
        }
        if !self
            .allowed_extensions
            .contains(&extension.to_ascii_lowercase())
        {
            return Err(Rejection::ExtensionNotAllowed {
                extension: extension.to_string(),
            });
        }
        Ok(())
    }
}

/// The part after the last `/`, i.e. the name the browser should save.
pub fn last_segment(path: &str) -> &str { path.rsplit('/').next().unwrap_or(path) }

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> FilenameValidator { FilenameValidator::from_config(&ProxyConfig::default()) }

    #[test]
    fn accepts_nested_release_paths() {
        let v = validator();
        assert_eq!(v.validate("demo/file.zip"), Ok(()));
        assert_eq!(v.validate("report.pdf"), Ok(()));
        assert_eq!(v.validate("Fioneer AI Agent/REL/1.0.0/K-100COINFAA.SAR"), Ok(()));
        assert_eq!(v.validate("a_b-c/d.e/archive.tar.gz"), Ok(()));
    }

    #[test]
    fn traversal_rejected_regardless_of_extension() {
        let v = validator();
        for name in [
            "../../etc/passwd",
            "../secret.zip",
            "demo/../file.zip",
            "/etc/file.zip",
            "demo\\file.zip",
            "demo..zip",
        ] {
            assert_eq!(v.validate(name), Err(Rejection::PathTraversal), "{name}");
        }
    }

    #[test]
    fn urls_rejected() {
        let v = validator();
        assert_eq!(
            v.validate("http://evil.example/file.zip"),
            Err(Rejection::AbsoluteUrl)
        );
        assert_eq!(
            v.validate("demo/s3://bucket/file.zip"),
            Err(Rejection::AbsoluteUrl)
        );
    }

    #[test]
    fn disallowed_extensions() {
        let v = validator();
        assert_eq!(
            v.validate("report.exe"),
            Err(Rejection::ExtensionNotAllowed {
                extension: "exe".to_string()
            })
        );
        assert_eq!(v.validate("README"), Err(Rejection::MissingExtension));
        assert_eq!(v.validate("demo/file."), Err(Rejection::MissingExtension));
        assert_eq!(v.validate("REPORT.PDF"), Ok(()));
    }

    #[test]
    fn length_and_emptiness() {
        let v = validator();
        assert_eq!(v.validate(""), Err(Rejection::Empty));

        let exactly = format!("{}.zip", "a".repeat(196));
        assert_eq!(v.validate(&exactly), Ok(()));
        let too_long = format!("{}.zip", "a".repeat(197));
        assert_eq!(v.validate(&too_long), Err(Rejection::TooLong { max: 200 }));
    }

    #[test]
    fn special_characters_rejected() {
        let v = validator();
        for name in [
            "demo//file.zip",
            "demo/file.zip/",
            "demo/fi?le.zip",
            "demo/<script>.zip",
            "demo/file;rm.zip",
            "démo/file.zip",
            "demo/file%2e.zip",
        ] {
            assert_eq!(
                v.validate(name),
                Err(Rejection::IllegalCharacters),
                "{name}"
            );
        }
    }

    #[test]
    fn custom_allow_list_is_normalised() {
        let v = FilenameValidator::new(50, [".BIN", "Iso"]);
        assert_eq!(v.validate("firmware.bin"), Ok(()));
        assert_eq!(v.validate("disk.ISO"), Ok(()));
        assert!(v.validate("file.zip").is_err());
    }

    #[test]
    fn last_segment_of_paths() {
        assert_eq!(last_segment("a/b/c.zip"), "c.zip");
        assert_eq!(last_segment("c.zip"), "c.zip");
    }
}
