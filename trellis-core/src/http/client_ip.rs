//! Client-IP resolution ladder.
//!
//! Order: configured platform header, then forwarded headers when the peer
//! is a trusted proxy, then the transport remote address. An explicit
//! per-request override bypasses all of this (see
//! [`Request::override_client_ip`](super::Request::override_client_ip)).

use std::net::IpAddr;

use http::HeaderMap;

use crate::config::TrustedProxyOptions;

pub fn resolve_client_ip(
    peer: Option<IpAddr>,
    headers: &HeaderMap,
    opts: &TrustedProxyOptions,
) -> Option<IpAddr> {
    if let Some(platform_header) = &opts.platform_header {
        if let Some(ip) = first_ip(headers, platform_header) {
            return Some(ip);
        }
    }

    if opts.enabled && opts.forward_client_ip {
        if let Some(peer_ip) = peer {
            if is_trusted(peer_ip, opts) {
                for header in &opts.headers {
                    if let Some(ip) = leftmost_untrusted(headers, header, opts) {
                        return Some(ip);
                    }
                }
            }
        }
    }

    peer
}

fn is_trusted(ip: IpAddr, opts: &TrustedProxyOptions) -> bool {
    opts.proxies.iter().any(|net| net.contains(&ip))
}

fn first_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .and_then(|s| s.trim().parse().ok())
}

/// Left-most address in the header that is not itself a trusted proxy.
fn leftmost_untrusted(
    headers: &HeaderMap,
    name: &str,
    opts: &TrustedProxyOptions,
) -> Option<IpAddr> {
    let raw = headers.get(name)?.to_str().ok()?;
    raw.split(',')
        .filter_map(|part| part.trim().parse::<IpAddr>().ok())
        .find(|ip| !is_trusted(*ip, opts))
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn opts(enabled: bool) -> TrustedProxyOptions {
        TrustedProxyOptions {
            enabled,
            proxies: vec!["10.0.0.0/8".parse().unwrap()],
            ..Default::default()
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_platform_header_wins() {
        let mut options = opts(false);
        options.platform_header = Some("cf-connecting-ip".into());
        let headers = headers(&[("cf-connecting-ip", "203.0.113.7")]);
        assert_eq!(
            resolve_client_ip(Some("10.1.1.1".parse().unwrap()), &headers, &options),
            Some("203.0.113.7".parse().unwrap())
        );
    }

    #[test]
    fn test_forwarded_for_from_trusted_peer() {
        let options = opts(true);
        let headers = headers(&[("x-forwarded-for", "10.0.0.5, 198.51.100.2, 10.0.0.1")]);
        // 10.0.0.5 is itself a proxy; the first non-proxy hop wins
        assert_eq!(
            resolve_client_ip(Some("10.0.0.1".parse().unwrap()), &headers, &options),
            Some("198.51.100.2".parse().unwrap())
        );
    }

    #[test]
    fn test_untrusted_peer_ignores_headers() {
        let options = opts(true);
        let headers = headers(&[("x-forwarded-for", "198.51.100.2")]);
        assert_eq!(
            resolve_client_ip(Some("192.0.2.9".parse().unwrap()), &headers, &options),
            Some("192.0.2.9".parse().unwrap())
        );
    }

    #[test]
    fn test_disabled_proxy_support_uses_peer() {
        let options = opts(false);
        let headers = headers(&[("x-forwarded-for", "198.51.100.2")]);
        assert_eq!(
            resolve_client_ip(Some("10.0.0.1".parse().unwrap()), &headers, &options),
            Some("10.0.0.1".parse().unwrap())
        );
    }
}
