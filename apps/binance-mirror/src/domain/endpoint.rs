//! REST Mirror Targets
//!
//! An [`EndpointSpec`] names one upstream REST endpoint to mirror: the
//! cache key downstream clients read it under, and the upstream URL it
//! is fetched from. The set of specs is loaded once at startup and never
//! mutated afterwards.

/// One REST mirror target: cache key plus upstream URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Cache key the fetched body is stored and served under.
    pub key: String,
    /// Upstream URL polled for this key.
    pub url: String,
}

impl EndpointSpec {
    /// Create a new endpoint spec.
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
        }
    }
}

impl std::fmt::Display for EndpointSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.key, self.url)
    }
}
