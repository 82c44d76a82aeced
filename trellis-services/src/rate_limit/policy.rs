//! Compiled rate-limit policies: request matching and identity resolution.

use std::net::IpAddr;

use http::{HeaderMap, Method};
use regex::Regex;
use trellis_core::config::{FailoverMode, IdentitySource, PolicyConfig, StrategyConfig};

/// Path glob; `*` matches any run of characters, including `/`.
pub struct PathGlob {
    regex: Regex,
}

impl PathGlob {
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let mut source = String::from("^");
        for (index, literal) in pattern.split('*').enumerate() {
            if index > 0 {
                source.push_str(".*");
            }
            source.push_str(&regex::escape(literal));
        }
        source.push('$');
        Ok(PathGlob {
            regex: Regex::new(&source)?,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

pub struct CompiledPolicy {
    pub name: String,
    pub strategy: StrategyConfig,
    pub failover: FailoverMode,
    method: Option<Method>,
    glob: PathGlob,
    identity: IdentitySource,
}

impl CompiledPolicy {
    pub fn compile(
        config: &PolicyConfig,
        default_failover: FailoverMode,
    ) -> Result<Self, regex::Error> {
        Ok(CompiledPolicy {
            name: config.name.clone(),
            strategy: config.strategy.clone(),
            failover: config.failover.unwrap_or(default_failover),
            method: config.method.clone(),
            glob: PathGlob::compile(&config.path)?,
            identity: config.identity.clone(),
        })
    }

    /// Whether this policy applies to `(method, path)`.
    pub fn applies(&self, method: &Method, path: &str) -> bool {
        match &self.method {
            Some(wanted) if wanted != method => false,
            _ => self.glob.matches(path),
        }
    }

    /// Resolve the bucket identity. `None` means unresolvable; the policy is
    /// skipped without error.
    pub fn identity(&self, headers: &HeaderMap, client_ip: Option<IpAddr>) -> Option<String> {
        match &self.identity {
            IdentitySource::ClientIp => client_ip.map(|ip| ip.to_string()),
            IdentitySource::Header(name) => headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        }
    }

    /// Cache key for one bucket: `policy:identity`.
    pub fn bucket_key(&self, identity: &str) -> String {
        format!("{}:{}", self.name, identity)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn policy(method: Option<Method>, path: &str) -> CompiledPolicy {
        CompiledPolicy::compile(
            &PolicyConfig {
                name: "test".into(),
                method,
                path: path.into(),
                identity: IdentitySource::ClientIp,
                strategy: StrategyConfig::Quota {
                    limit: 1,
                    period: Duration::from_secs(60),
                },
                failover: None,
            },
            FailoverMode::Allow,
        )
        .unwrap()
    }

    #[test]
    fn test_glob_matches_segment_runs() {
        let p = policy(None, "/api/*");
        assert!(p.applies(&Method::GET, "/api/users"));
        assert!(p.applies(&Method::POST, "/api/users/42/posts"));
        assert!(!p.applies(&Method::GET, "/health"));

        let exact = policy(None, "/resource");
        assert!(exact.applies(&Method::GET, "/resource"));
        assert!(!exact.applies(&Method::GET, "/resource/sub"));

        let infix = policy(None, "/v*/users");
        assert!(infix.applies(&Method::GET, "/v1/users"));
        assert!(!infix.applies(&Method::GET, "/v1/admins"));
    }

    #[test]
    fn test_method_filter() {
        let p = policy(Some(Method::POST), "/api/*");
        assert!(p.applies(&Method::POST, "/api/users"));
        assert!(!p.applies(&Method::GET, "/api/users"));
    }

    #[test]
    fn test_identity_resolution() {
        let p = policy(None, "*");
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(
            p.identity(&HeaderMap::new(), Some(ip)).as_deref(),
            Some("192.0.2.1")
        );
        assert_eq!(p.identity(&HeaderMap::new(), None), None);
        assert_eq!(p.bucket_key("192.0.2.1"), "test:192.0.2.1");

        let by_header = CompiledPolicy::compile(
            &PolicyConfig {
                name: "hdr".into(),
                method: None,
                path: "*".into(),
                identity: IdentitySource::Header("x-user-id".into()),
                strategy: StrategyConfig::Quota {
                    limit: 1,
                    period: Duration::from_secs(60),
                },
                failover: None,
            },
            FailoverMode::Allow,
        )
        .unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(by_header.identity(&headers, Some(ip)), None);
        headers.insert("x-user-id", "user-123".parse().unwrap());
        assert_eq!(
            by_header.identity(&headers, Some(ip)).as_deref(),
            Some("user-123")
        );
    }
}
