//! Host validation with DNS resolution.
//!
//! Every connection the fetcher makes, including each redirect hop, goes
//! through a [`HostGuard`] first. The address the guard returns is the one
//! the connection is pinned to, so a second lookup cannot swap in a
//! different (internal) answer between the check and the connect.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use hickory_resolver::TokioResolver;
use url::{Host, Url};

use super::classify::is_private;
use super::error::SsrfError;

/// Name resolution seam.
pub trait Resolve: Send + Sync {
    /// Resolve `host` to its addresses, in preference order.
    fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>>;
}

/// Resolver backed by the system DNS configuration.
pub struct HickoryResolver {
    inner: TokioResolver,
}

impl HickoryResolver {
    pub fn from_system_conf() -> Result<Self, hickory_resolver::ResolveError> {
        let inner = TokioResolver::builder_tokio()?.build();
        Ok(Self { inner })
    }
}

impl Resolve for HickoryResolver {
    fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>> {
        Box::pin(async move {
            let lookup = self.inner.lookup_ip(host).await.map_err(io::Error::other)?;
            Ok(lookup.iter().collect())
        })
    }
}

/// Decides whether a URL's host may be connected to.
pub trait HostGuard: Send + Sync {
    /// Vet the host of `url`, returning the address to connect to.
    fn admit<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<IpAddr, SsrfError>>;
}

/// Default guard: blocks loopback aliases, resolves through DNS and refuses
/// any answer that is a private or reserved address.
#[derive(Clone)]
pub struct DnsHostGuard {
    resolver: Arc<dyn Resolve>,
}

impl DnsHostGuard {
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self { resolver }
    }

    /// Fails with [`SsrfError`] unless `host` resolves only to public addresses.
    pub async fn assert_public(&self, host: Host<&str>) -> Result<IpAddr, SsrfError> {
        match host {
            Host::Domain(name) => self.assert_public_domain(name).await,
            Host::Ipv4(ip) => check_address(IpAddr::V4(ip)),
            Host::Ipv6(ip) => check_address(IpAddr::V6(ip)),
        }
    }

    async fn assert_public_domain(&self, name: &str) -> Result<IpAddr, SsrfError> {
        if is_localhost(name) {
            tracing::warn!(host = %name, "refusing loopback alias");
            return Err(SsrfError::BlockedHost);
        }

        let addrs = self.resolver.resolve(name).await.map_err(|e| {
            tracing::warn!(host = %name, error = %e, "DNS resolution failed");
            SsrfError::DnsFailed
        })?;

        let Some(&first) = addrs.first() else {
            tracing::warn!(host = %name, "DNS returned no addresses");
            return Err(SsrfError::DnsFailed);
        };

        // 任何一个解析结果是内网地址都拒绝
        for &ip in &addrs {
            if is_private(ip.to_canonical()) {
                tracing::warn!(host = %name, ip = %ip, "host resolves to a private address");
                return Err(SsrfError::BlockedHost);
            }
        }

        // 连接固定到已校验的第一个地址
        Ok(first)
    }
}

impl HostGuard for DnsHostGuard {
    fn admit<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<IpAddr, SsrfError>> {
        Box::pin(async move {
            let host = url.host().ok_or(SsrfError::BlockedHost)?;
            self.assert_public(host).await
        })
    }
}

fn is_localhost(name: &str) -> bool {
    name.eq_ignore_ascii_case("localhost") || name.eq_ignore_ascii_case("localhost.")
}

fn check_address(ip: IpAddr) -> Result<IpAddr, SsrfError> {
    // IPv4-mapped IPv6 literals reach the embedded IPv4 host.
    if is_private(ip.to_canonical()) {
        tracing::warn!(ip = %ip, "refusing private address literal");
        return Err(SsrfError::BlockedHost);
    }
    Ok(ip)
}
