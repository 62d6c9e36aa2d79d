//! Registration hand-off to the client UI.
//!
//! The provider is authorized out-of-band: the operator opens a URL that
//! carries the connection endpoint, the shared secret and the advertised
//! capability bounds. The browser stores them and connects back over the
//! WebSocket endpoint.

use std::iter::zip;

use bridge_core::filter::EngineLimits;
use serde::{Deserialize, Serialize};

/// Shared connection token.
///
/// Comparison is a best-effort attempt at constant time so the check does
/// not leak the secret through timing.
#[derive(Clone, Debug, Eq, Serialize, Deserialize)]
pub struct Secret(pub String);

impl Secret {
    pub fn generate() -> Secret {
        Secret(format!("{:032x}", rand::random::<u128>()))
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Secret) -> bool {
        self.0.len() == other.0.len()
            && zip(self.0.as_bytes(), other.0.as_bytes()).fold(0, |acc, (l, r)| acc | (l ^ r)) == 0
    }
}

/// Parameters advertised to the browser client via the registration URL.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSpec {
    pub url: String,
    pub secret: Secret,
    pub name: String,
    pub max_threads: u64,
    pub max_hash: u64,
    /// Comma-separated variant names; omitted entirely when empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub variants: String,
}

impl RegistrationSpec {
    pub fn new(url: String, name: String, secret: Secret, limits: &EngineLimits) -> RegistrationSpec {
        RegistrationSpec {
            url,
            secret,
            name,
            max_threads: limits.max_threads,
            max_hash: limits.max_hash,
            variants: limits.variants.join(","),
        }
    }

    /// The analysis page that consumes these parameters.
    pub fn registration_url(&self) -> String {
        format!(
            "https://lichess.org/analysis/external?{}",
            serde_urlencoded::to_string(self).expect("serialize registration spec"),
        )
    }
}
