//! Client identity used to partition rate limits.

use std::fmt;

/// Header carrying the client's API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Proxy-supplied client address.
pub const REAL_IP_HEADER: &str = "x-real-ip";
/// Proxy chain, left-most entry is the original client.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Rate-limit partition key derived from a request.
///
/// Always non-empty: either `apikey:<key>` or `ip:<address>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Identity for a request presenting an API key.
    pub fn from_api_key(key: &str) -> Option<Self> {
        let key = key.trim();
        (!key.is_empty()).then(|| Self(format!("apikey:{}", key)))
    }

    /// Identity for a request identified only by its network origin.
    pub fn from_origin(addr: &str) -> Self {
        let addr = addr.trim();
        if addr.is_empty() {
            Self("ip:unknown".to_string())
        } else {
            Self(format!("ip:{}", addr))
        }
    }

    /// Derive the identity for a request.
    ///
    /// The API key wins when present. Otherwise a proxy-supplied address
    /// (`X-Real-IP`, then the first `X-Forwarded-For` hop) is preferred over
    /// the raw peer address, which has its port stripped.
    pub fn derive(
        api_key: Option<&str>,
        real_ip: Option<&str>,
        forwarded_for: Option<&str>,
        peer_addr: Option<&str>,
    ) -> Self {
        if let Some(identity) = api_key.and_then(Self::from_api_key) {
            return identity;
        }

        let proxied = real_ip
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| {
                forwarded_for
                    .and_then(|chain| chain.split(',').next())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            });

        match proxied {
            Some(addr) => Self::from_origin(addr),
            None => Self::from_origin(peer_addr.map(strip_port).unwrap_or_default()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip a trailing `:port` from a raw transport address.
///
/// Handles `1.2.3.4:80`, `[::1]:80` and bare addresses. A bare IPv6 address
/// without brackets is returned unchanged.
pub fn strip_port(addr: &str) -> &str {
    let addr = addr.trim();

    if let Some(rest) = addr.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => addr,
        };
    }

    match addr.rsplit_once(':') {
        // More than one colon without brackets means bare IPv6
        Some((host, port)) if !host.contains(':') && is_port(port) => host,
        _ => addr,
    }
}

fn is_port(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
