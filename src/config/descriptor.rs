//! Connection Descriptor Parsing
//!
//! A descriptor looks like `jdbc:cloudops:azure.tenantId=t;cache.ttlMinutes=10`.
//! The parameter section is split on `;`, and each segment on its first `=`.
//!
//! Malformed segments are tolerated: every segment yields a [`Fragment`], either
//! `Parsed` or `Skipped` with the reason, so nothing is dropped silently.

/// Scheme prefix accepted by the driver
pub const SCHEME: &str = "jdbc:cloudops:";

/// Why a descriptor segment was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Segment was empty or whitespace (e.g. a trailing `;`)
    Empty,
    /// Segment has no `=`
    MissingSeparator,
    /// Segment starts with `=` (or only whitespace before it)
    EmptyKey,
}

impl SkipReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty segment",
            Self::MissingSeparator => "missing '='",
            Self::EmptyKey => "empty key",
        }
    }
}

/// Outcome of parsing one `;`-separated segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Parsed { key: String, value: String },
    Skipped { raw: String, reason: SkipReason },
}

impl Fragment {
    #[must_use]
    pub const fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed { .. })
    }
}

/// Returns true when `descriptor` carries the CloudOps scheme prefix
///
/// `None` and any other prefix are not accepted. This never errors.
#[must_use]
pub fn accepts(descriptor: Option<&str>) -> bool {
    descriptor.is_some_and(|d| d.starts_with(SCHEME))
}

/// Strip the scheme prefix, returning the parameter section
#[must_use]
pub fn parameters(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix(SCHEME)
}

/// Classify every segment of a parameter section
pub fn parse_fragments(params: &str) -> Vec<Fragment> {
    if params.is_empty() {
        return Vec::new();
    }

    params
        .split(';')
        .map(|segment| {
            if segment.trim().is_empty() {
                return Fragment::Skipped { raw: segment.to_string(), reason: SkipReason::Empty };
            }
            match segment.split_once('=') {
                None => Fragment::Skipped {
                    raw: segment.to_string(),
                    reason: SkipReason::MissingSeparator,
                },
                Some((key, _)) if key.trim().is_empty() => {
                    Fragment::Skipped { raw: segment.to_string(), reason: SkipReason::EmptyKey }
                }
                Some((key, value)) => Fragment::Parsed {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                },
            }
        })
        .collect()
}

/// Parse a parameter section into an ordered key/value map
pub fn parse(params: &str) -> RawParams {
    let fragments = parse_fragments(params);
    for fragment in &fragments {
        if let Fragment::Skipped { raw, reason } = fragment {
            // Segment text may carry a secret, so only its length is logged
            tracing::debug!(reason = reason.as_str(), len = raw.len(), "Skipping descriptor segment");
        }
    }
    RawParams::from_fragments(fragments)
}

/// Ordered key/value parameters
///
/// A repeated key keeps its first position and takes the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawParams {
    entries: Vec<(String, String)>,
}

impl RawParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fragments(fragments: impl IntoIterator<Item = Fragment>) -> Self {
        let mut params = Self::new();
        for fragment in fragments {
            if let Fragment::Parsed { key, value } = fragment {
                params.insert(key, value);
            }
        }
        params
    }

    /// Insert or overwrite a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}
