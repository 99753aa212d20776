//! Reserved / private address classification.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IPv6 literals that are always blocked.
const BLOCKED_IPV6: &[&str] = &["::1", "::"];

/// Returns `true` when `ip` falls in a loopback, private, link-local or
/// otherwise reserved range that an outbound fetch must never reach.
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    match ip.octets() {
        [127, ..] | [10, ..] | [0, ..] => true,
        [169, 254, ..] | [192, 168, ..] => true,
        // 172.16.0.0/12
        [172, second, ..] => (16..=31).contains(&second),
        _ => false,
    }
}

// 按规范文本形式匹配：fc/fd 开头为唯一本地地址，fe80 开头为链路本地地址
fn is_private_v6(ip: Ipv6Addr) -> bool {
    let normalized = ip.to_string().to_lowercase();
    if BLOCKED_IPV6.contains(&normalized.as_str()) {
        return true;
    }
    normalized.starts_with("fc") || normalized.starts_with("fd") || normalized.starts_with("fe80")
}
