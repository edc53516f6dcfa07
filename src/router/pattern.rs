//! Path patterns with static and bracket-named dynamic segments

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("pattern must start with '/': {0}")]
    MissingLeadingSlash(String),
    #[error("empty parameter name in pattern: {0}")]
    EmptyParam(String),
    #[error("malformed segment {segment:?} in pattern: {pattern}")]
    MalformedSegment { pattern: String, segment: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
}

/// A parsed route pattern such as `/users/[id]/posts`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

/// Strip a trailing slash (except for the root) so `/a/` and `/a` resolve
/// identically.
pub fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if !raw.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(raw.to_string()));
        }
        let raw = normalize(raw).to_string();
        let mut segments = Vec::new();
        let parts: Vec<&str> = if raw == "/" {
            Vec::new()
        } else {
            raw.split('/').skip(1).collect()
        };
        for segment in parts {
            if let Some(inner) = segment.strip_prefix('[') {
                let Some(name) = inner.strip_suffix(']') else {
                    return Err(PatternError::MalformedSegment {
                        pattern: raw.clone(),
                        segment: segment.to_string(),
                    });
                };
                if name.is_empty() {
                    return Err(PatternError::EmptyParam(raw.clone()));
                }
                segments.push(Segment::Param(name.to_string()));
            } else if segment.contains('[') || segment.contains(']') {
                return Err(PatternError::MalformedSegment {
                    pattern: raw.clone(),
                    segment: segment.to_string(),
                });
            } else {
                segments.push(Segment::Static(segment.to_string()));
            }
        }
        Ok(Self { raw, segments })
    }

    /// The normalized pattern text; doubles as the route's state scope key.
    pub fn key(&self) -> &str {
        &self.raw
    }

    /// True when the pattern binds no parameters.
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Static(_)))
    }

    /// Match a concrete path, binding bracket segments to parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let path = normalize(path);
        let parts: Vec<&str> = if path == "/" {
            Vec::new()
        } else {
            path.split('/').skip(1).collect()
        };
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Static(expected) if expected == part => {}
                Segment::Static(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
            }
        }
        Some(params)
    }
}
