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

//! Attributes the repository reports for an access token.

use serde::{Deserialize, Serialize};

/// One token as listed by the repository's access-token API.
///
/// Only descriptive fields are kept; anything else the repository sends is
/// dropped. Times are Unix seconds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id:   Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject:    Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope:      Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at:  Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry:     Option<u64>,
}

impl TokenAttributes {
    /// Absolute expiry, either as reported or derived from issue time and
    /// lifetime.
    pub fn expires_at(&self) -> Option<u64> {
        self.expiry
            .or_else(|| self.issued_at?.checked_add(self.expires_in?))
    }
}

/// The listing comes either bare or wrapped in `{"tokens": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TokenListing {
    Bare(Vec<TokenAttributes>),
    Wrapped { tokens: Vec<TokenAttributes> },
}

impl TokenListing {
    pub(crate) fn into_tokens(self) -> Vec<TokenAttributes> {
        let (Self::Bare(tokens) | Self::Wrapped { tokens }) = self;
        tokens
            .into_iter()
            .map(|mut token| {
                token.expiry = token.expires_at();
                token
            })
            .collect()
    }
}
