//! Typed config sections and their binders.
//!
//! Every section is bound through one resolver (`from_value`) and can be
//! serialized back (`to_value`); binding the result of `to_value` yields the
//! same section. In strict mode unknown keys are rejected.

use std::{collections::BTreeMap, time::Duration};

use http::Method;
use ipnet::IpNet;

use super::{ConfigError, Value};

/// Cursor over one map-shaped config section. Tracks which keys the binder
/// consumed so strict mode can reject the rest.
pub(crate) struct Section<'a> {
    path: &'static str,
    map: Option<&'a BTreeMap<String, Value>>,
    strict: bool,
    known: Vec<&'static str>,
}

impl<'a> Section<'a> {
    pub(crate) fn new(
        path: &'static str,
        value: Option<&'a Value>,
        strict: bool,
    ) -> Result<Self, ConfigError> {
        let map = match value {
            None => None,
            Some(Value::Map(map)) => Some(map),
            Some(_) => {
                return Err(ConfigError::InvalidType {
                    path: path.into(),
                    expected: "map",
                })
            }
        };
        Ok(Section {
            path,
            map,
            strict,
            known: Vec::new(),
        })
    }

    fn key_path(&self, key: &str) -> String {
        format!("{}.{}", self.path, key)
    }

    pub(crate) fn raw(&mut self, key: &'static str) -> Option<&'a Value> {
        self.known.push(key);
        self.map.and_then(|m| m.get(key))
    }

    pub(crate) fn bool_or(&mut self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| ConfigError::InvalidType {
                path: self.key_path(key),
                expected: "bool",
            }),
        }
    }

    pub(crate) fn str_opt(&mut self, key: &'static str) -> Result<Option<&'a str>, ConfigError> {
        match self.raw(key) {
            None => Ok(None),
            Some(v) => v.as_str().map(Some).ok_or_else(|| ConfigError::InvalidType {
                path: self.key_path(key),
                expected: "string",
            }),
        }
    }

    pub(crate) fn string_or(
        &mut self,
        key: &'static str,
        default: &str,
    ) -> Result<String, ConfigError> {
        Ok(self.str_opt(key)?.unwrap_or(default).to_string())
    }

    pub(crate) fn string_required(&mut self, key: &'static str) -> Result<String, ConfigError> {
        self.str_opt(key)?
            .map(str::to_string)
            .ok_or_else(|| ConfigError::Missing {
                path: self.key_path(key),
            })
    }

    fn int(&self, key: &str, v: &Value) -> Result<i64, ConfigError> {
        v.as_int().ok_or_else(|| ConfigError::InvalidType {
            path: self.key_path(key),
            expected: "integer",
        })
    }

    pub(crate) fn u32_opt(&mut self, key: &'static str) -> Result<Option<u32>, ConfigError> {
        match self.raw(key) {
            None => Ok(None),
            Some(v) => {
                let i = self.int(key, v)?;
                u32::try_from(i)
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidValue {
                        path: self.key_path(key),
                        reason: format!("{i} out of range"),
                    })
            }
        }
    }

    pub(crate) fn u32_or(&mut self, key: &'static str, default: u32) -> Result<u32, ConfigError> {
        Ok(self.u32_opt(key)?.unwrap_or(default))
    }

    pub(crate) fn u64_opt(&mut self, key: &'static str) -> Result<Option<u64>, ConfigError> {
        match self.raw(key) {
            None => Ok(None),
            Some(v) => {
                let i = self.int(key, v)?;
                u64::try_from(i)
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidValue {
                        path: self.key_path(key),
                        reason: format!("{i} out of range"),
                    })
            }
        }
    }

    pub(crate) fn usize_or(
        &mut self,
        key: &'static str,
        default: usize,
    ) -> Result<usize, ConfigError> {
        Ok(self.u64_opt(key)?.map(|v| v as usize).unwrap_or(default))
    }

    pub(crate) fn f64_or(&mut self, key: &'static str, default: f64) -> Result<f64, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v.as_double().ok_or_else(|| ConfigError::InvalidType {
                path: self.key_path(key),
                expected: "number",
            }),
        }
    }

    pub(crate) fn duration_opt(
        &mut self,
        key: &'static str,
    ) -> Result<Option<Duration>, ConfigError> {
        match self.raw(key) {
            None => Ok(None),
            Some(v) => v.as_duration().map(Some).ok_or_else(|| ConfigError::InvalidType {
                path: self.key_path(key),
                expected: "duration",
            }),
        }
    }

    pub(crate) fn duration_or(
        &mut self,
        key: &'static str,
        default: Duration,
    ) -> Result<Duration, ConfigError> {
        Ok(self.duration_opt(key)?.unwrap_or(default))
    }

    pub(crate) fn str_list(&mut self, key: &'static str) -> Result<Vec<String>, ConfigError> {
        match self.raw(key) {
            None => Ok(Vec::new()),
            Some(Value::List(items)) => items
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| ConfigError::InvalidType {
                        path: self.key_path(key),
                        expected: "list of strings",
                    })
                })
                .collect(),
            Some(_) => Err(ConfigError::InvalidType {
                path: self.key_path(key),
                expected: "list",
            }),
        }
    }

    pub(crate) fn finish(self) -> Result<(), ConfigError> {
        if !self.strict {
            return Ok(());
        }
        if let Some(map) = self.map {
            for key in map.keys() {
                if !self.known.iter().any(|k| k == key) {
                    return Err(ConfigError::UnknownKey {
                        path: self.key_path(key),
                    });
                }
            }
        }
        Ok(())
    }
}

fn parse_nets(path: &str, raw: Vec<String>) -> Result<Vec<IpNet>, ConfigError> {
    raw.into_iter()
        .map(|s| {
            if let Ok(net) = s.parse::<IpNet>() {
                return Ok(net);
            }
            // a bare address means the full-length prefix
            s.parse::<std::net::IpAddr>()
                .map(IpNet::from)
                .map_err(|_| ConfigError::InvalidValue {
                    path: path.into(),
                    reason: format!("invalid CIDR or address {s:?}"),
                })
        })
        .collect()
}

fn nets_to_value(nets: &[IpNet]) -> Value {
    nets.iter().map(|n| n.to_string()).collect()
}

fn strings_to_value(items: &[String]) -> Value {
    items.iter().map(String::as_str).collect()
}

/// All engine-facing config sections, bound from the config root.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub routing: RoutingOptions,
    pub security: SecurityOptions,
    pub rate_limit: RateLimitOptions,
    pub session: SessionOptions,
}

impl EngineConfig {
    pub fn from_value(root: &Value, strict: bool) -> Result<Self, ConfigError> {
        Ok(EngineConfig {
            routing: RoutingOptions::from_value(root.get("routing"), strict)?,
            security: SecurityOptions::from_value(root.get("security"), strict)?,
            rate_limit: RateLimitOptions::from_value(root.get("rate_limit"), strict)?,
            session: SessionOptions::from_value(root.get("session"), strict)?,
        })
    }

    pub fn to_value(&self) -> Value {
        Value::Map(BTreeMap::from([
            ("routing".to_string(), self.routing.to_value()),
            ("security".to_string(), self.security.to_value()),
            ("rate_limit".to_string(), self.rate_limit.to_value()),
            ("session".to_string(), self.session.to_value()),
        ]))
    }
}

/// `routing.*`: matcher behavior toggles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingOptions {
    pub redirect_trailing_slash: bool,
    pub handle_method_not_allowed: bool,
    pub default_options: bool,
    pub etag: EtagStrategy,
}

impl Default for RoutingOptions {
    fn default() -> Self {
        RoutingOptions {
            redirect_trailing_slash: true,
            handle_method_not_allowed: true,
            default_options: false,
            etag: EtagStrategy::Disabled,
        }
    }
}

impl RoutingOptions {
    pub fn from_value(value: Option<&Value>, strict: bool) -> Result<Self, ConfigError> {
        let mut section = Section::new("routing", value, strict)?;
        let etag_raw = section.raw("etag").cloned();
        let mut etag_section = Section::new("routing.etag", etag_raw.as_ref(), strict)?;
        let etag = match etag_section.str_opt("strategy")? {
            None => EtagStrategy::Disabled,
            Some("disabled") => EtagStrategy::Disabled,
            Some("strong") => EtagStrategy::Strong,
            Some("weak") => EtagStrategy::Weak,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    path: "routing.etag.strategy".into(),
                    reason: format!("unknown strategy {other:?}"),
                })
            }
        };
        etag_section.finish()?;
        let options = RoutingOptions {
            redirect_trailing_slash: section.bool_or("redirect_trailing_slash", true)?,
            handle_method_not_allowed: section.bool_or("handle_method_not_allowed", true)?,
            default_options: section.bool_or("default_options", false)?,
            etag,
        };
        section.finish()?;
        Ok(options)
    }

    pub fn to_value(&self) -> Value {
        Value::Map(BTreeMap::from([
            (
                "redirect_trailing_slash".to_string(),
                Value::Bool(self.redirect_trailing_slash),
            ),
            (
                "handle_method_not_allowed".to_string(),
                Value::Bool(self.handle_method_not_allowed),
            ),
            ("default_options".to_string(), Value::Bool(self.default_options)),
            (
                "etag".to_string(),
                Value::Map(BTreeMap::from([(
                    "strategy".to_string(),
                    Value::String(self.etag.as_str().to_string()),
                )])),
            ),
        ]))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum EtagStrategy {
    #[default]
    Disabled,
    Strong,
    Weak,
}

impl EtagStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EtagStrategy::Disabled => "disabled",
            EtagStrategy::Strong => "strong",
            EtagStrategy::Weak => "weak",
        }
    }
}

/// `security.*`: request-size cap, CSRF, trusted proxies and the IP gate.
#[derive(Debug, Clone, Default)]
pub struct SecurityOptions {
    pub max_request_size: Option<u64>,
    pub csrf: CsrfOptions,
    pub trusted_proxies: TrustedProxyOptions,
    pub ip_filter: IpFilterOptions,
}

impl SecurityOptions {
    pub fn from_value(value: Option<&Value>, strict: bool) -> Result<Self, ConfigError> {
        let mut section = Section::new("security", value, strict)?;
        let csrf = CsrfOptions::from_value(section.raw("csrf"), strict)?;
        let trusted_proxies = TrustedProxyOptions::from_value(section.raw("trusted_proxies"), strict)?;
        let ip_filter = IpFilterOptions::from_value(section.raw("ip_filter"), strict)?;
        let options = SecurityOptions {
            max_request_size: section.u64_opt("max_request_size")?,
            csrf,
            trusted_proxies,
            ip_filter,
        };
        section.finish()?;
        Ok(options)
    }

    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::from([
            ("csrf".to_string(), self.csrf.to_value()),
            ("trusted_proxies".to_string(), self.trusted_proxies.to_value()),
            ("ip_filter".to_string(), self.ip_filter.to_value()),
        ]);
        if let Some(size) = self.max_request_size {
            map.insert("max_request_size".to_string(), Value::from(size));
        }
        Value::Map(map)
    }
}

pub const DEFAULT_CSRF_COOKIE: &str = "xsrf-token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfOptions {
    pub enabled: bool,
    pub cookie_name: String,
}

impl Default for CsrfOptions {
    fn default() -> Self {
        CsrfOptions {
            enabled: false,
            cookie_name: DEFAULT_CSRF_COOKIE.to_string(),
        }
    }
}

impl CsrfOptions {
    fn from_value(value: Option<&Value>, strict: bool) -> Result<Self, ConfigError> {
        let mut section = Section::new("security.csrf", value, strict)?;
        let options = CsrfOptions {
            enabled: section.bool_or("enabled", false)?,
            cookie_name: section.string_or("cookie_name", DEFAULT_CSRF_COOKIE)?,
        };
        section.finish()?;
        Ok(options)
    }

    fn to_value(&self) -> Value {
        Value::Map(BTreeMap::from([
            ("enabled".to_string(), Value::Bool(self.enabled)),
            ("cookie_name".to_string(), Value::from(self.cookie_name.as_str())),
        ]))
    }
}

/// `security.trusted_proxies.*`: which peers are believed when they forward
/// a client address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedProxyOptions {
    pub enabled: bool,
    pub proxies: Vec<IpNet>,
    pub headers: Vec<String>,
    pub platform_header: Option<String>,
    pub forward_client_ip: bool,
}

fn default_forward_headers() -> Vec<String> {
    vec!["x-forwarded-for".to_string(), "x-real-ip".to_string()]
}

impl Default for TrustedProxyOptions {
    fn default() -> Self {
        TrustedProxyOptions {
            enabled: false,
            proxies: Vec::new(),
            headers: default_forward_headers(),
            platform_header: None,
            forward_client_ip: true,
        }
    }
}

impl TrustedProxyOptions {
    fn from_value(value: Option<&Value>, strict: bool) -> Result<Self, ConfigError> {
        let mut section = Section::new("security.trusted_proxies", value, strict)?;
        let proxies = parse_nets("security.trusted_proxies.proxies", section.str_list("proxies")?)?;
        let mut headers: Vec<String> = section
            .str_list("headers")?
            .into_iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        if headers.is_empty() {
            headers = default_forward_headers();
        }
        let options = TrustedProxyOptions {
            enabled: section.bool_or("enabled", false)?,
            proxies,
            headers,
            platform_header: section
                .str_opt("platform_header")?
                .map(|h| h.to_ascii_lowercase()),
            forward_client_ip: section.bool_or("forward_client_ip", true)?,
        };
        section.finish()?;
        Ok(options)
    }

    fn to_value(&self) -> Value {
        let mut map = BTreeMap::from([
            ("enabled".to_string(), Value::Bool(self.enabled)),
            ("proxies".to_string(), nets_to_value(&self.proxies)),
            ("headers".to_string(), strings_to_value(&self.headers)),
            (
                "forward_client_ip".to_string(),
                Value::Bool(self.forward_client_ip),
            ),
        ]);
        if let Some(header) = &self.platform_header {
            map.insert("platform_header".to_string(), Value::from(header.as_str()));
        }
        Value::Map(map)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum IpAction {
    #[default]
    Allow,
    Deny,
}

impl IpAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpAction::Allow => "allow",
            IpAction::Deny => "deny",
        }
    }
}

/// `security.ip_filter.*`: pre-handler allow/deny gate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IpFilterOptions {
    pub enabled: bool,
    pub default_action: IpAction,
    pub allow: Vec<IpNet>,
    pub deny: Vec<IpNet>,
}

impl IpFilterOptions {
    fn from_value(value: Option<&Value>, strict: bool) -> Result<Self, ConfigError> {
        let mut section = Section::new("security.ip_filter", value, strict)?;
        let default_action = match section.str_opt("default_action")? {
            None | Some("allow") => IpAction::Allow,
            Some("deny") => IpAction::Deny,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    path: "security.ip_filter.default_action".into(),
                    reason: format!("unknown action {other:?}"),
                })
            }
        };
        let options = IpFilterOptions {
            enabled: section.bool_or("enabled", false)?,
            default_action,
            allow: parse_nets("security.ip_filter.allow", section.str_list("allow")?)?,
            deny: parse_nets("security.ip_filter.deny", section.str_list("deny")?)?,
        };
        section.finish()?;
        Ok(options)
    }

    fn to_value(&self) -> Value {
        Value::Map(BTreeMap::from([
            ("enabled".to_string(), Value::Bool(self.enabled)),
            (
                "default_action".to_string(),
                Value::from(self.default_action.as_str()),
            ),
            ("allow".to_string(), nets_to_value(&self.allow)),
            ("deny".to_string(), nets_to_value(&self.deny)),
        ]))
    }
}

/// What happens to a rate-limit policy when its backend errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FailoverMode {
    #[default]
    Allow,
    Block,
    Local,
}

impl FailoverMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverMode::Allow => "allow",
            FailoverMode::Block => "block",
            FailoverMode::Local => "local",
        }
    }

    fn parse(path: &str, s: &str) -> Result<Self, ConfigError> {
        match s {
            "allow" => Ok(FailoverMode::Allow),
            "block" => Ok(FailoverMode::Block),
            "local" => Ok(FailoverMode::Local),
            other => Err(ConfigError::InvalidValue {
                path: path.into(),
                reason: format!("unknown failover mode {other:?}"),
            }),
        }
    }
}

/// `rate_limit.*`: backend selection and the policy list.
#[derive(Debug, Clone, Default)]
pub struct RateLimitOptions {
    pub enabled: bool,
    pub backend: String,
    /// Named cache store within the backend; backends with a single store
    /// ignore it.
    pub store: String,
    pub failover: FailoverMode,
    pub policies: Vec<PolicyConfig>,
}

impl RateLimitOptions {
    pub fn from_value(value: Option<&Value>, strict: bool) -> Result<Self, ConfigError> {
        let mut section = Section::new("rate_limit", value, strict)?;
        let policies = match section.raw("policies") {
            None => Vec::new(),
            Some(Value::List(items)) => {
                let mut policies = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    policies.push(PolicyConfig::from_value(i, item, strict)?);
                }
                policies
            }
            Some(_) => {
                return Err(ConfigError::InvalidType {
                    path: "rate_limit.policies".into(),
                    expected: "list",
                })
            }
        };
        let failover = match section.str_opt("failover")? {
            None => FailoverMode::Allow,
            Some(s) => FailoverMode::parse("rate_limit.failover", s)?,
        };
        let options = RateLimitOptions {
            enabled: section.bool_or("enabled", false)?,
            backend: section.string_or("backend", "memory")?,
            store: section.string_or("store", "default")?,
            failover,
            policies,
        };
        section.finish()?;
        Ok(options)
    }

    pub fn to_value(&self) -> Value {
        Value::Map(BTreeMap::from([
            ("enabled".to_string(), Value::Bool(self.enabled)),
            ("backend".to_string(), Value::from(self.backend.as_str())),
            ("store".to_string(), Value::from(self.store.as_str())),
            ("failover".to_string(), Value::from(self.failover.as_str())),
            (
                "policies".to_string(),
                Value::List(self.policies.iter().map(PolicyConfig::to_value).collect()),
            ),
        ]))
    }
}

/// How a policy derives the identity a bucket is keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    ClientIp,
    Header(String),
}

/// One rate-limit algorithm plus its knobs.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyConfig {
    TokenBucket {
        capacity: u32,
        refill_interval: Duration,
        burst: f64,
    },
    SlidingWindow {
        limit: u32,
        window: Duration,
    },
    Quota {
        limit: u32,
        period: Duration,
    },
}

impl StrategyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::TokenBucket { .. } => "token_bucket",
            StrategyConfig::SlidingWindow { .. } => "sliding_window",
            StrategyConfig::Quota { .. } => "quota",
        }
    }
}

/// One declared rate-limit policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    pub name: String,
    /// `None` matches every method.
    pub method: Option<Method>,
    /// Path glob; `*` matches any run of characters including `/`.
    pub path: String,
    pub identity: IdentitySource,
    pub strategy: StrategyConfig,
    pub failover: Option<FailoverMode>,
}

impl PolicyConfig {
    fn from_value(index: usize, value: &Value, strict: bool) -> Result<Self, ConfigError> {
        let path_of = |key: &str| format!("rate_limit.policies[{index}].{key}");
        let mut section = Section::new("rate_limit.policies", Some(value), strict)?;

        let name = section.string_required("name")?;
        let method = match section.str_opt("method")? {
            None | Some("*") => None,
            Some(m) => Some(Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(
                |_| ConfigError::InvalidValue {
                    path: path_of("method"),
                    reason: format!("invalid method {m:?}"),
                },
            )?),
        };
        let path = section.string_or("path", "*")?;

        let identity = match section.str_opt("identify")? {
            None | Some("ip") => IdentitySource::ClientIp,
            Some("header") => {
                let header = section.string_required("header")?;
                IdentitySource::Header(header.to_ascii_lowercase())
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    path: path_of("identify"),
                    reason: format!("unknown identity source {other:?}"),
                })
            }
        };

        let positive = |key: &'static str, d: Option<Duration>| -> Result<Duration, ConfigError> {
            match d {
                Some(d) if !d.is_zero() => Ok(d),
                Some(_) => Err(ConfigError::InvalidValue {
                    path: path_of(key),
                    reason: "duration must be > 0".into(),
                }),
                None => Err(ConfigError::Missing { path: path_of(key) }),
            }
        };
        let at_least_one = |key: &'static str, n: Option<u32>| -> Result<u32, ConfigError> {
            match n {
                Some(n) if n >= 1 => Ok(n),
                Some(_) => Err(ConfigError::InvalidValue {
                    path: path_of(key),
                    reason: "must be >= 1".into(),
                }),
                None => Err(ConfigError::Missing { path: path_of(key) }),
            }
        };

        let strategy = match section.str_opt("strategy")? {
            Some("token_bucket") | None => {
                let capacity = at_least_one("capacity", section.u32_opt("capacity")?)?;
                let refill_interval =
                    positive("refill_interval", section.duration_opt("refill_interval")?)?;
                let burst = section.f64_or("burst", 1.0)?;
                if burst < 1.0 {
                    return Err(ConfigError::InvalidValue {
                        path: path_of("burst"),
                        reason: "burst multiplier must be >= 1".into(),
                    });
                }
                StrategyConfig::TokenBucket {
                    capacity,
                    refill_interval,
                    burst,
                }
            }
            Some("sliding_window") => StrategyConfig::SlidingWindow {
                limit: at_least_one("limit", section.u32_opt("limit")?)?,
                window: positive("window", section.duration_opt("window")?)?,
            },
            Some("quota") => StrategyConfig::Quota {
                limit: at_least_one("limit", section.u32_opt("limit")?)?,
                period: positive("period", section.duration_opt("period")?)?,
            },
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    path: path_of("strategy"),
                    reason: format!("unknown strategy {other:?}"),
                })
            }
        };

        let failover = match section.str_opt("failover")? {
            None => None,
            Some(s) => Some(FailoverMode::parse(&path_of("failover"), s)?),
        };

        section.finish()?;
        Ok(PolicyConfig {
            name,
            method,
            path,
            identity,
            strategy,
            failover,
        })
    }

    fn to_value(&self) -> Value {
        let mut map = BTreeMap::from([
            ("name".to_string(), Value::from(self.name.as_str())),
            (
                "method".to_string(),
                Value::from(self.method.as_ref().map(|m| m.as_str()).unwrap_or("*")),
            ),
            ("path".to_string(), Value::from(self.path.as_str())),
            ("strategy".to_string(), Value::from(self.strategy.name())),
        ]);
        match &self.identity {
            IdentitySource::ClientIp => {
                map.insert("identify".to_string(), Value::from("ip"));
            }
            IdentitySource::Header(header) => {
                map.insert("identify".to_string(), Value::from("header"));
                map.insert("header".to_string(), Value::from(header.as_str()));
            }
        }
        match &self.strategy {
            StrategyConfig::TokenBucket {
                capacity,
                refill_interval,
                burst,
            } => {
                map.insert("capacity".to_string(), Value::from(u64::from(*capacity)));
                map.insert("refill_interval".to_string(), Value::from(*refill_interval));
                map.insert("burst".to_string(), Value::Double(*burst));
            }
            StrategyConfig::SlidingWindow { limit, window } => {
                map.insert("limit".to_string(), Value::from(u64::from(*limit)));
                map.insert("window".to_string(), Value::from(*window));
            }
            StrategyConfig::Quota { limit, period } => {
                map.insert("limit".to_string(), Value::from(u64::from(*limit)));
                map.insert("period".to_string(), Value::from(*period));
            }
        }
        if let Some(failover) = self.failover {
            map.insert("failover".to_string(), Value::from(failover.as_str()));
        }
        Value::Map(map)
    }
}

/// `session.*`: collaborator wiring only; the engine never touches session
/// storage itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub driver: String,
    pub lifetime: Duration,
    pub cookie: String,
    pub encrypt: bool,
    pub keys: Vec<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            driver: "memory".to_string(),
            lifetime: Duration::from_secs(7200),
            cookie: "trellis_session".to_string(),
            encrypt: false,
            keys: Vec::new(),
        }
    }
}

impl SessionOptions {
    pub fn from_value(value: Option<&Value>, strict: bool) -> Result<Self, ConfigError> {
        let mut section = Section::new("session", value, strict)?;
        let options = SessionOptions {
            driver: section.string_or("driver", "memory")?,
            lifetime: section.duration_or("lifetime", Duration::from_secs(7200))?,
            cookie: section.string_or("cookie", "trellis_session")?,
            encrypt: section.bool_or("encrypt", false)?,
            keys: section.str_list("keys")?,
        };
        section.finish()?;
        Ok(options)
    }

    pub fn to_value(&self) -> Value {
        Value::Map(BTreeMap::from([
            ("driver".to_string(), Value::from(self.driver.as_str())),
            ("lifetime".to_string(), Value::from(self.lifetime)),
            ("cookie".to_string(), Value::from(self.cookie.as_str())),
            ("encrypt".to_string(), Value::Bool(self.encrypt)),
            ("keys".to_string(), strings_to_value(&self.keys)),
        ]))
    }
}

/// `server.*`: connection-level timeouts and the shutdown drain deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub keepalive_timeout: Option<Duration>,
    pub read_header_timeout: Option<Duration>,
    pub drain_deadline: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        const DEFAULT_KEEPALIVE_SEC: u64 = 75;
        ServerOptions {
            keepalive_timeout: Some(Duration::from_secs(DEFAULT_KEEPALIVE_SEC)),
            read_header_timeout: None,
            drain_deadline: Duration::from_secs(30),
        }
    }
}

impl ServerOptions {
    pub fn from_value(value: Option<&Value>, strict: bool) -> Result<Self, ConfigError> {
        let defaults = ServerOptions::default();
        let mut section = Section::new("server", value, strict)?;
        let keepalive_timeout = match section.raw("keepalive_timeout") {
            None => defaults.keepalive_timeout,
            Some(Value::Bool(false)) => None,
            Some(v) => Some(v.as_duration().ok_or_else(|| ConfigError::InvalidType {
                path: "server.keepalive_timeout".into(),
                expected: "duration",
            })?),
        };
        let options = ServerOptions {
            keepalive_timeout,
            read_header_timeout: section.duration_opt("read_header_timeout")?,
            drain_deadline: section.duration_or("drain_deadline", defaults.drain_deadline)?,
        };
        section.finish()?;
        Ok(options)
    }
}
