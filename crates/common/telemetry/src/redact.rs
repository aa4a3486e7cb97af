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

//! Helpers for logging secrets without logging secrets.
//!
//! Bearer tokens are only ever recorded as a presence flag plus a short
//! SHA-256 fingerprint, enough to correlate requests made with the same
//! token across log lines.

use sha2::{Digest, Sha256};

/// Hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 12;

/// Short, stable, non-reversible identifier for `secret`.
#[must_use]
pub fn fingerprint(secret: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(secret.as_bytes()));
    digest[..FINGERPRINT_LEN].to_string()
}

/// Fingerprint of an optional secret, `"-"` when absent.
#[must_use]
pub fn fingerprint_opt(secret: Option<&str>) -> String {
    secret.map_or_else(|| "-".to_string(), fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = fingerprint("eyJhbGciOiJSUzI1NiJ9.secret");
        let b = fingerprint("eyJhbGciOiJSUzI1NiJ9.secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), FINGERPRINT_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_distinguishes_tokens() {
        let token = "abcdefabcdef0123456789";
        assert_ne!(fingerprint(token), fingerprint("abcdefabcdef0123456788"));
    }

    #[test]
    fn absent_secret_renders_dash() {
        assert_eq!(fingerprint_opt(None), "-");
        assert_eq!(fingerprint_opt(Some("x")), fingerprint("x"));
    }
}
