//! Turning tab urls into site identities and deciding whether a site is exempt from tracking.

use std::{fmt::Display, ops::Deref, sync::Arc};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TrackerError;

/// Normalized hostname used as the tracking key. Two identities are equal only if their
/// hostnames are exactly equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteIdentity(Arc<str>);

impl SiteIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for SiteIdentity {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for SiteIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteIdentity {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

/// Extracts hostname out of a page url. Only http and https pages are trackable, internal
/// browser pages (chrome://, about:, extension pages) are reported as invalid.
pub fn extract_identity(url: &str) -> Result<SiteIdentity, TrackerError> {
    let parsed = Url::parse(url).map_err(|_| TrackerError::InvalidUrl(url.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(TrackerError::InvalidUrl(url.to_string()));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(SiteIdentity(host.into())),
        _ => Err(TrackerError::InvalidUrl(url.to_string())),
    }
}

/// A site is blacklisted if it's equal to an entry or is a subdomain of it.
pub fn is_blacklisted<S: AsRef<str>>(identity: &SiteIdentity, blacklist: &[S]) -> bool {
    blacklist.iter().map(AsRef::as_ref).any(|entry| {
        !entry.is_empty()
            && (identity.as_str() == entry
                || identity
                    .strip_suffix(entry)
                    .is_some_and(|prefix| prefix.ends_with('.')))
    })
}

/// Ordered list of exempt domains. Keeps insertion order and never holds duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteBlacklist(Vec<String>);

impl SiteBlacklist {
    /// Builds a blacklist out of arbitrary entries, silently dropping duplicates and blanks.
    pub fn from_entries(entries: impl IntoIterator<Item = String>) -> Self {
        let mut blacklist = Self::default();
        for entry in entries {
            blacklist.insert(&entry);
        }
        blacklist
    }

    /// Returns false if the entry was rejected, either because it's empty or already present.
    pub fn insert(&mut self, domain: &str) -> bool {
        let domain = domain.trim().to_lowercase();
        if domain.is_empty() || self.0.contains(&domain) {
            return false;
        }
        self.0.push(domain);
        true
    }

    pub fn remove(&mut self, domain: &str) -> bool {
        let domain = domain.trim().to_lowercase();
        let before = self.0.len();
        self.0.retain(|v| *v != domain);
        before != self.0.len()
    }

    pub fn contains(&self, identity: &SiteIdentity) -> bool {
        is_blacklisted(identity, &self.0)
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }
}
