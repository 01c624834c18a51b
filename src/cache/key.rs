//! Cache keys and scopes
//!
//! A [`CacheKey`] captures everything that can change the rows a scan returns:
//! relation, projection, filters, sort, pagination, and the enabled providers.
//! Filters are stored in a canonical order so `a AND b` and `b AND a` share an
//! entry; projection and sort order are kept as given because they change the
//! shape of the result.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::{Configuration, Provider};
use crate::engine::QueryRequest;

/// Normalized pushdown shape of one scan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    relation: String,
    projection: Vec<String>,
    filters: Vec<String>,
    order_by: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    providers: Vec<Provider>,
}

impl CacheKey {
    /// Key for `request` as seen by a connection with `providers` enabled
    pub fn new(request: &QueryRequest, providers: impl IntoIterator<Item = Provider>) -> Self {
        let mut filters: Vec<String> = request.filters.iter().map(|p| p.signature()).collect();
        filters.sort();

        let mut providers: Vec<Provider> = providers.into_iter().collect();
        providers.sort();
        providers.dedup();

        Self {
            relation: request.table.to_ascii_lowercase(),
            projection: request.projection.clone(),
            filters,
            order_by: request.order_by.iter().map(ToString::to_string).collect(),
            limit: request.limit,
            offset: request.offset,
            providers,
        }
    }

    #[must_use]
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Short, stable digest for logs
    #[must_use]
    pub fn signature(&self) -> String {
        let digest = format!("{:x}", Sha256::digest(self.to_string().as_bytes()));
        digest[..16].to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.relation,
            self.projection.join(","),
            self.filters.join(" AND "),
            self.order_by.join(",")
        )?;
        write!(f, "|limit={:?}|offset={:?}|", self.limit, self.offset)?;
        let providers: Vec<&str> = self.providers.iter().map(Provider::as_str).collect();
        f.write_str(&providers.join(","))
    }
}

/// Partition of the shared store owned by one configuration fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheScope(String);

impl CacheScope {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self(fingerprint.into())
    }

    #[must_use]
    pub fn for_config(config: &Configuration) -> Self {
        Self::new(config.fingerprint())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
