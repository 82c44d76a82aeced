//! Dynamic configuration tree.
//!
//! Config files (TOML or JSON) are parsed into a [`Value`] tree first; typed
//! sections are then bound out of the tree by the resolvers in
//! [`bind`](super::bind). `Value` is also the contract config providers
//! answer: `get(path)` / `has(path)` with dotted paths.

use std::{collections::BTreeMap, time::Duration};

use super::ConfigError;

/// Union of every shape a configuration value can take.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Dotted-path lookup, e.g. `security.trusted_proxies.enabled`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for part in path.split('.') {
            match current {
                Value::Map(map) => current = map.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Doubles accept integer literals as well; `limit = 3` and `limit = 3.0`
    /// bind identically.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Durations are written either as a bare number of seconds or as a
    /// string with a unit suffix: `500ms`, `30s`, `5m`, `2h`, `1d`.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Value::Int(secs) if *secs >= 0 => Some(Duration::from_secs(*secs as u64)),
            Value::Double(secs) if *secs >= 0.0 => Some(Duration::from_secs_f64(*secs)),
            Value::String(s) => parse_duration(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Parse raw config file content. JSON is detected by the first
    /// non-whitespace byte being `{`; everything else is treated as TOML.
    pub fn from_slice(content: &[u8]) -> Result<Value, ConfigError> {
        let is_json = content
            .iter()
            .find(|&&b| b != b' ' && b != b'\r' && b != b'\n' && b != b'\t')
            .map(|&b| b == b'{')
            .unwrap_or(false);
        if is_json {
            let parsed: serde_json::Value =
                serde_json::from_slice(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(Value::from_json(parsed))
        } else {
            let parsed: toml::Value = toml::from_str(&String::from_utf8_lossy(content))
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(Value::from_toml(parsed))
        }
    }

    pub fn from_json(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn from_toml(value: toml::Value) -> Value {
        match value {
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Integer(i) => Value::Int(i),
            toml::Value::Float(f) => Value::Double(f),
            toml::Value::String(s) => Value::String(s),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_toml).collect())
            }
            toml::Value::Table(table) => Value::Map(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_toml(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        if v.subsec_nanos() == 0 {
            Value::String(format!("{}s", v.as_secs()))
        } else {
            Value::String(format!("{}ms", v.as_millis()))
        }
    }
}

impl<V: Into<Value>> FromIterator<V> for Value {
    fn from_iter<T: IntoIterator<Item = V>>(iter: T) -> Self {
        Value::List(iter.into_iter().map(Into::into).collect())
    }
}

pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let split = s.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (num, unit) = s.split_at(split);
    let amount: f64 = num.parse().ok()?;
    let secs = match unit.trim() {
        "ms" => amount / 1000.0,
        "s" => amount,
        "m" => amount * 60.0,
        "h" => amount * 3600.0,
        "d" => amount * 86400.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_lookup() {
        let v = Value::from_slice(
            br#"
            [security.trusted_proxies]
            enabled = true
            proxies = ["10.0.0.0/8"]
            "#,
        )
        .unwrap();
        assert_eq!(
            v.get("security.trusted_proxies.enabled"),
            Some(&Value::Bool(true))
        );
        assert!(v.has("security.trusted_proxies.proxies"));
        assert!(!v.has("security.csrf"));
    }

    #[test]
    fn test_json_detection() {
        let v = Value::from_slice(br#" {"routing": {"redirect_trailing_slash": false}} "#).unwrap();
        assert_eq!(
            v.get("routing.redirect_trailing_slash"),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn test_durations() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("15"), Some(Duration::from_secs(15)));
        assert_eq!(parse_duration("nope"), None);
        assert_eq!(Value::Int(90).as_duration(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_double_coercion() {
        assert_eq!(Value::Int(3).as_double(), Some(3.0));
        assert_eq!(Value::Double(0.5).as_double(), Some(0.5));
        assert_eq!(Value::String("3".into()).as_double(), None);
    }
}
