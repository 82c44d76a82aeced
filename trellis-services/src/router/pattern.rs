//! Route pattern compiler.
//!
//! Grammar: `/`-separated literals and placeholders. `{name}` matches one
//! segment, `{name:type}` validates against the type's pattern, `{name?}`
//! marks an optional trailing segment, `{*name}` captures the remainder of
//! the path including `/`. A per-name constraint replaces the otherwise
//! permissive segment pattern.

use std::collections::HashMap;

use regex::Regex;
use trellis_core::http::params::{ParamInfo, ParamKind, ParamValue, PathParams};

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub optional: bool,
    pub wildcard: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum PatternError {
    #[error("empty parameter name in {0:?}")]
    EmptyName(String),
    #[error("duplicate parameter {name:?} in {pattern:?}")]
    DuplicateParam { pattern: String, name: String },
    #[error("optional segment must be the last segment in {0:?}")]
    OptionalNotLast(String),
    #[error("wildcard segment must be the last segment in {0:?}")]
    WildcardNotLast(String),
    #[error("unknown parameter type {ty:?} in {pattern:?}")]
    UnknownType { pattern: String, ty: String },
    #[error("constraint references unknown parameter {0:?}")]
    UnknownConstraint(String),
    #[error("invalid constraint for {name:?}: {source}")]
    BadConstraint {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid pattern {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug)]
pub struct CompiledPattern {
    pattern: String,
    regex: Regex,
    params: Vec<ParamSpec>,
}

enum Piece {
    Literal(String),
    Param {
        name: String,
        kind: ParamKind,
        optional: bool,
    },
    Wildcard(String),
}

pub fn compile(
    pattern: &str,
    constraints: &HashMap<String, String>,
) -> Result<CompiledPattern, PatternError> {
    let pieces = parse(pattern)?;

    let declared: Vec<&str> = pieces
        .iter()
        .filter_map(|p| match p {
            Piece::Param { name, .. } => Some(name.as_str()),
            Piece::Wildcard(name) => Some(name.as_str()),
            Piece::Literal(_) => None,
        })
        .collect();
    for name in constraints.keys() {
        if !declared.contains(&name.as_str()) {
            return Err(PatternError::UnknownConstraint(name.clone()));
        }
    }

    // captures use synthetic group names so a constraint carrying its own
    // groups cannot shift anything
    let mut source = String::from("^");
    let mut params = Vec::new();
    for piece in &pieces {
        let group = params.len();
        match piece {
            Piece::Literal(text) => {
                source.push('/');
                source.push_str(&regex::escape(text));
            }
            Piece::Param {
                name,
                kind,
                optional,
            } => {
                let fragment = match constraints.get(name) {
                    Some(constraint) => {
                        // validate the user-supplied fragment on its own
                        Regex::new(constraint).map_err(|source| PatternError::BadConstraint {
                            name: name.clone(),
                            source,
                        })?;
                        constraint.clone()
                    }
                    None => kind.segment_pattern().to_string(),
                };
                if *optional {
                    source.push_str(&format!("(?:/(?P<p{group}>{fragment}))?"));
                } else {
                    source.push_str(&format!("/(?P<p{group}>{fragment})"));
                }
                params.push(ParamSpec {
                    name: name.clone(),
                    kind: *kind,
                    optional: *optional,
                    wildcard: false,
                });
            }
            Piece::Wildcard(name) => {
                source.push_str(&format!("(?:/(?P<p{group}>.*))?"));
                params.push(ParamSpec {
                    name: name.clone(),
                    kind: ParamKind::String,
                    optional: false,
                    wildcard: true,
                });
            }
        }
    }
    if pieces.is_empty() {
        source.push('/');
    }
    source.push('$');

    let regex = Regex::new(&source).map_err(|source| PatternError::Regex {
        pattern: pattern.to_string(),
        source,
    })?;
    Ok(CompiledPattern {
        pattern: pattern.to_string(),
        regex,
        params,
    })
}

fn parse(pattern: &str) -> Result<Vec<Piece>, PatternError> {
    let trimmed = pattern.strip_prefix('/').unwrap_or(pattern);
    let mut pieces = Vec::new();
    let segments: Vec<&str> = if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    };
    let last = segments.len().saturating_sub(1);

    let mut names: Vec<String> = Vec::new();
    for (index, segment) in segments.iter().enumerate() {
        let piece = match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            None => Piece::Literal((*segment).to_string()),
            Some(inner) => {
                if let Some(name) = inner.strip_prefix('*') {
                    if name.is_empty() {
                        return Err(PatternError::EmptyName(pattern.to_string()));
                    }
                    if index != last {
                        return Err(PatternError::WildcardNotLast(pattern.to_string()));
                    }
                    Piece::Wildcard(name.to_string())
                } else {
                    let (inner, optional) = match inner.strip_suffix('?') {
                        Some(inner) => (inner, true),
                        None => (inner, false),
                    };
                    if optional && index != last {
                        return Err(PatternError::OptionalNotLast(pattern.to_string()));
                    }
                    let (name, kind) = match inner.split_once(':') {
                        None => (inner, ParamKind::String),
                        Some((name, ty)) => (
                            name,
                            ParamKind::parse(ty).ok_or_else(|| PatternError::UnknownType {
                                pattern: pattern.to_string(),
                                ty: ty.to_string(),
                            })?,
                        ),
                    };
                    if name.is_empty() {
                        return Err(PatternError::EmptyName(pattern.to_string()));
                    }
                    Piece::Param {
                        name: name.to_string(),
                        kind,
                        optional,
                    }
                }
            }
        };
        if let Piece::Param { name, .. } | Piece::Wildcard(name) = &piece {
            if names.contains(name) {
                return Err(PatternError::DuplicateParam {
                    pattern: pattern.to_string(),
                    name: name.clone(),
                });
            }
            names.push(name.clone());
        }
        pieces.push(piece);
    }
    Ok(pieces)
}

impl CompiledPattern {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Match a normalized path, returning the ordered typed captures.
    /// Returns `None` when the regex misses or a capture fails its kind's
    /// post-parse (an invalid typed value is a non-match, not an error).
    pub fn match_path(&self, path: &str) -> Option<PathParams> {
        let captures = self.regex.captures(path)?;
        let mut params = PathParams::new();
        for (index, spec) in self.params.iter().enumerate() {
            let info = ParamInfo {
                kind: spec.kind,
                optional: spec.optional,
                wildcard: spec.wildcard,
            };
            match captures.name(&format!("p{index}")) {
                Some(capture) => {
                    let value = spec.kind.coerce(capture.as_str())?;
                    params.push(spec.name.clone(), value, info);
                }
                None if spec.wildcard => {
                    params.push(spec.name.clone(), ParamValue::Str(String::new()), info);
                }
                None => {
                    params.push(spec.name.clone(), ParamValue::Null, info);
                }
            }
        }
        Some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_plain(pattern: &str) -> CompiledPattern {
        compile(pattern, &HashMap::new()).unwrap()
    }

    #[test]
    fn test_literal_and_root() {
        let root = compile_plain("/");
        assert!(root.match_path("/").is_some());
        assert!(root.match_path("/x").is_none());

        let users = compile_plain("/users");
        assert!(users.match_path("/users").is_some());
        assert!(users.match_path("/users/").is_none());
    }

    #[test]
    fn test_typed_int_capture() {
        let compiled = compile_plain("/users/{id:int}");
        let params = compiled.match_path("/users/42").unwrap();
        assert_eq!(params.get("id").unwrap().as_int(), Some(42));
        assert!(compiled.match_path("/users/abc").is_none());
        assert!(compiled.match_path("/users/-7").unwrap().get("id").unwrap().as_int() == Some(-7));
    }

    #[test]
    fn test_typed_kinds() {
        let compiled = compile_plain("/price/{amount:double}");
        let params = compiled.match_path("/price/3.25").unwrap();
        assert_eq!(params.get("amount").unwrap().as_double(), Some(3.25));
        // integers coerce to double
        let params = compiled.match_path("/price/3").unwrap();
        assert_eq!(params.get("amount").unwrap().as_double(), Some(3.0));

        let compiled = compile_plain("/posts/{slug:slug}");
        assert!(compiled.match_path("/posts/hello-world-2").is_some());
        assert!(compiled.match_path("/posts/Hello").is_none());

        let compiled = compile_plain("/items/{id:uuid}");
        assert!(compiled
            .match_path("/items/550e8400-e29b-41d4-a716-446655440000")
            .is_some());
        assert!(compiled.match_path("/items/not-a-uuid").is_none());

        let compiled = compile_plain("/contact/{addr:email}");
        assert!(compiled.match_path("/contact/a.b@example.org").is_some());
        assert!(compiled.match_path("/contact/nope").is_none());

        let compiled = compile_plain("/peer/{addr:ip}");
        assert!(compiled.match_path("/peer/192.168.0.1").is_some());
        assert!(compiled.match_path("/peer/fe80::1").is_some());
        assert!(compiled.match_path("/peer/999.1.1.1").is_none());
    }

    #[test]
    fn test_optional_trailing_segment() {
        let compiled = compile_plain("/archive/{year:int}/{month?}");
        let params = compiled.match_path("/archive/2024/06").unwrap();
        assert_eq!(params.get("month").unwrap().as_str(), Some("06"));

        let params = compiled.match_path("/archive/2024").unwrap();
        assert!(params.get("month").unwrap().is_null());
        assert!(params.info("month").unwrap().optional);
    }

    #[test]
    fn test_wildcard_preserves_slashes() {
        let compiled = compile_plain("/files/{*path}");
        let params = compiled.match_path("/files/a/b/c.txt").unwrap();
        assert_eq!(params.get("path").unwrap().as_str(), Some("a/b/c.txt"));
        assert!(params.info("path").unwrap().wildcard);
        // bare prefix still matches, with an empty tail
        let params = compiled.match_path("/files").unwrap();
        assert_eq!(params.get("path").unwrap().as_str(), Some(""));
    }

    #[test]
    fn test_constraints_narrow_captures() {
        let mut constraints = HashMap::new();
        constraints.insert("code".to_string(), "[A-Z]{3}".to_string());
        let compiled = compile("/currency/{code}", &constraints).unwrap();
        assert!(compiled.match_path("/currency/USD").is_some());
        assert!(compiled.match_path("/currency/usd").is_none());
    }

    #[test]
    fn test_compile_errors() {
        assert!(matches!(
            compile("/a/{x?}/b", &HashMap::new()),
            Err(PatternError::OptionalNotLast(_))
        ));
        assert!(matches!(
            compile("/a/{*rest}/b", &HashMap::new()),
            Err(PatternError::WildcardNotLast(_))
        ));
        assert!(matches!(
            compile("/a/{x:datetime}", &HashMap::new()),
            Err(PatternError::UnknownType { .. })
        ));
        assert!(matches!(
            compile("/a/{x}/{x}", &HashMap::new()),
            Err(PatternError::DuplicateParam { .. })
        ));
        assert!(matches!(
            compile("/a/{}", &HashMap::new()),
            Err(PatternError::EmptyName(_))
        ));

        let mut constraints = HashMap::new();
        constraints.insert("ghost".to_string(), ".*".to_string());
        assert!(matches!(
            compile("/a/{x}", &constraints),
            Err(PatternError::UnknownConstraint(_))
        ));

        let mut constraints = HashMap::new();
        constraints.insert("x".to_string(), "[".to_string());
        assert!(matches!(
            compile("/a/{x}", &constraints),
            Err(PatternError::BadConstraint { .. })
        ));
    }
}
