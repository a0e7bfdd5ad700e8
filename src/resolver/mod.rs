//! Host identifier to network address resolution.
//!
//! Resolution is neither cached nor retried: each reconciliation pass asks
//! again, and a failure is handed straight back to the caller.


use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use parking_lot::RwLock;
use tracing::debug;

use crate::ResolutionError;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddressResolver: Send + Sync + 'static {
    /// Resolves `host` to the textual form of one of its addresses
    async fn resolve(
        &self,
        host: &str,
    ) -> Result<String, ResolutionError>;
}

/// Delegates to the operating system resolver and keeps the first address.
///
/// IP literals are returned unchanged without a lookup.
#[derive(Debug, Default, Clone)]
pub struct SystemResolver;

#[async_trait]
impl AddressResolver for SystemResolver {
    async fn resolve(
        &self,
        host: &str,
    ) -> Result<String, ResolutionError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip.to_string());
        }

        let mut addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| ResolutionError::Unresolvable {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        let addr = addrs.next().ok_or_else(|| ResolutionError::NoAddress(host.to_string()))?;
        debug!(%host, address = %addr.ip(), "resolved host");
        Ok(addr.ip().to_string())
    }
}

/// Fixed host table. Hosts missing from the table are unresolvable.
#[derive(Debug, Default)]
pub struct StaticResolver {
    table: RwLock<HashMap<String, String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        self,
        host: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        self.insert(host, address);
        self
    }

    pub fn insert(
        &self,
        host: impl Into<String>,
        address: impl Into<String>,
    ) {
        self.table.write().insert(host.into(), address.into());
    }

    pub fn remove(
        &self,
        host: &str,
    ) -> Option<String> {
        self.table.write().remove(host)
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(
        &self,
        host: &str,
    ) -> Result<String, ResolutionError> {
        self.table
            .read()
            .get(host)
            .cloned()
            .ok_or_else(|| ResolutionError::Unresolvable {
                host: host.to_string(),
                reason: "not in static table".to_string(),
            })
    }
}
