//! Media fingerprinting
//! Derives a stable dedup key from a raw media locator by normalizing the
//! URL variants social platforms serve for the same asset.

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

lazy_static::lazy_static! {
    static ref SIZE_SUFFIX: Regex = Regex::new(r":(small|medium|thumb)$").expect("valid regex");
}

/// Resolution token every size variant collapses to
const LARGEST_VARIANT: &str = "large";

/// Normalized dedup key; also the URL submitted for locator-based analysis
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VariantPolicy {
    /// Query strings only carry signatures and cache busters
    StripQuery,
    /// Size is encoded as a `:size` suffix or a `name=` query parameter
    LargestSizeToken,
}

#[derive(Debug)]
struct PlatformRule {
    name: &'static str,
    host_markers: &'static [&'static str],
    policy: VariantPolicy,
}

const PLATFORM_RULES: &[PlatformRule] = &[
    PlatformRule {
        name: "instagram",
        host_markers: &["instagram"],
        policy: VariantPolicy::StripQuery,
    },
    PlatformRule {
        name: "facebook",
        host_markers: &["facebook", "fbcdn"],
        policy: VariantPolicy::StripQuery,
    },
    PlatformRule {
        name: "twitter",
        host_markers: &["twitter", "twimg"],
        policy: VariantPolicy::LargestSizeToken,
    },
];

/// Pure, side-effect-free locator normalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintResolver;

impl FingerprintResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a raw locator. Unknown hosts and unparseable locators pass
    /// through unchanged.
    pub fn resolve(&self, raw_locator: &str) -> Fingerprint {
        let raw = raw_locator.trim();
        let Ok(mut url) = Url::parse(raw) else {
            return Fingerprint(raw.to_string());
        };
        let Some(rule) = Self::rule_for(&url) else {
            return Fingerprint(raw.to_string());
        };

        match rule.policy {
            VariantPolicy::StripQuery => url.set_query(None),
            VariantPolicy::LargestSizeToken => Self::canonicalize_size(&mut url),
        }

        tracing::trace!("Normalized {} locator: {} -> {}", rule.name, raw, url);
        Fingerprint(url.into())
    }

    fn rule_for(url: &Url) -> Option<&'static PlatformRule> {
        let host = url.host_str()?.to_ascii_lowercase();
        PLATFORM_RULES
            .iter()
            .find(|rule| rule.host_markers.iter().any(|m| host.contains(m)))
    }

    fn canonicalize_size(url: &mut Url) {
        let path = url.path().to_string();
        if SIZE_SUFFIX.is_match(&path) {
            let replaced = SIZE_SUFFIX.replace(&path, format!(":{}", LARGEST_VARIANT));
            url.set_path(&replaced);
        }

        if url.query().is_none() {
            return;
        }
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                if k == "name" {
                    (k.into_owned(), LARGEST_VARIANT.to_string())
                } else {
                    (k.into_owned(), v.into_owned())
                }
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
}
