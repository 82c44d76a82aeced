//! Typed path parameters.
//!
//! The matcher validates captured segments against a kind's pattern and
//! coerces them here; handlers read them back in registration order.

use std::net::IpAddr;

/// The named capture kinds a route pattern can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamKind {
    Int,
    Double,
    Slug,
    Uuid,
    Email,
    Ip,
    #[default]
    String,
}

impl ParamKind {
    pub fn parse(name: &str) -> Option<ParamKind> {
        Some(match name {
            "int" => ParamKind::Int,
            "double" => ParamKind::Double,
            "slug" => ParamKind::Slug,
            "uuid" => ParamKind::Uuid,
            "email" => ParamKind::Email,
            "ip" => ParamKind::Ip,
            "string" => ParamKind::String,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Int => "int",
            ParamKind::Double => "double",
            ParamKind::Slug => "slug",
            ParamKind::Uuid => "uuid",
            ParamKind::Email => "email",
            ParamKind::Ip => "ip",
            ParamKind::String => "string",
        }
    }

    /// Segment-level regex fragment (non-capturing groups only; the compiler
    /// wraps the whole fragment in its own capture).
    pub fn segment_pattern(&self) -> &'static str {
        match self {
            ParamKind::Int => r"-?\d+",
            ParamKind::Double => r"-?\d+(?:\.\d+)?",
            ParamKind::Slug => r"[a-z0-9]+(?:-[a-z0-9]+)*",
            ParamKind::Uuid => {
                r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}"
            }
            ParamKind::Email => r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}",
            ParamKind::Ip => r"(?:\d{1,3}(?:\.\d{1,3}){3}|[0-9a-fA-F:]*:[0-9a-fA-F:.]+)",
            ParamKind::String => r"[^/]+",
        }
    }

    /// Post-parse coercion. `None` means the raw text passed the pattern but
    /// fails the stricter parse (treated as no-match by the caller).
    pub fn coerce(&self, raw: &str) -> Option<ParamValue> {
        match self {
            ParamKind::Int => raw.parse::<i64>().ok().map(ParamValue::Int),
            ParamKind::Double => raw.parse::<f64>().ok().map(ParamValue::Double),
            ParamKind::Ip => raw
                .parse::<IpAddr>()
                .ok()
                .map(|_| ParamValue::Str(raw.to_string())),
            _ => Some(ParamValue::Str(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Double(f64),
    Str(String),
    /// A declared-but-absent optional segment.
    Null,
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            ParamValue::Double(d) => Some(*d),
            ParamValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamInfo {
    pub kind: ParamKind,
    pub optional: bool,
    pub wildcard: bool,
}

/// Ordered parameter list; order is the pattern's declaration order so the
/// original path can be reconstructed.
#[derive(Debug, Clone, Default)]
pub struct PathParams {
    entries: Vec<(String, ParamValue, ParamInfo)>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: ParamValue, info: ParamInfo) {
        self.entries.push((name.into(), value, info));
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, v, _)| v)
    }

    pub fn info(&self, name: &str) -> Option<ParamInfo> {
        self.entries
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, _, i)| *i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, ParamValue, ParamInfo)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
