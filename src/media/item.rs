use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// An addressable media source in the feed.
///
/// Immutable; two items are the same item when their addresses match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaItem {
    url: Url,
}

impl MediaItem {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    /// Parse an absolute address.
    pub fn parse(address: &str) -> Result<Self, url::ParseError> {
        Url::parse(address).map(Self::new)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for MediaItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl From<Url> for MediaItem {
    fn from(url: Url) -> Self {
        Self::new(url)
    }
}
