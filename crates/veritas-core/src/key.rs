//! Structured cache keys for verdicts.
//!
//! A key is a BLAKE3 digest over the key-normalized claim, the strategy and
//! the effective provider list. Fields are joined with ASCII unit separators
//! before hashing so no two field layouts can collide.
//!
//! The rendered form `verdict:<strategy>:<providers>:<digest>` is what the
//! cache stores. Its colon-separated segments are also what predictive
//! lookup compares.

use std::fmt;

use crate::text::normalize_for_key;
use crate::types::{ProviderId, Strategy};

const KEY_DOMAIN: &[u8] = b"veritas.verdict.v1";
const FIELD_SEPARATOR: u8 = 0x1f;
const LIST_SEPARATOR: u8 = 0x1e;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VerdictKey {
    strategy: Strategy,
    providers: Vec<ProviderId>,
    digest: String,
}

impl VerdictKey {
    pub fn new(claim: &str, strategy: Strategy, providers: &[ProviderId]) -> Self {
        let mut providers = providers.to_vec();
        providers.sort();
        providers.dedup();

        let normalized = normalize_for_key(claim);

        let mut hasher = blake3::Hasher::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(&[FIELD_SEPARATOR]);
        hasher.update(normalized.as_bytes());
        hasher.update(&[FIELD_SEPARATOR]);
        hasher.update(strategy.as_str().as_bytes());
        hasher.update(&[FIELD_SEPARATOR]);
        for (i, provider) in providers.iter().enumerate() {
            if i > 0 {
                hasher.update(&[LIST_SEPARATOR]);
            }
            hasher.update(provider.as_str().as_bytes());
        }

        Self {
            strategy,
            providers,
            digest: hasher.finalize().to_hex().to_string(),
        }
    }

    /// Hex-encoded BLAKE3 digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn providers(&self) -> &[ProviderId] {
        &self.providers
    }

    /// `verdict:<strategy>:<providers joined by '+'>:<digest>`
    pub fn render(&self) -> String {
        let providers = if self.providers.is_empty() {
            "none".to_string()
        } else {
            self.providers
                .iter()
                .map(ProviderId::as_str)
                .collect::<Vec<_>>()
                .join("+")
        };
        format!("verdict:{}:{}:{}", self.strategy, providers, self.digest)
    }
}

impl fmt::Display for VerdictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
