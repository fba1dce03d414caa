pub use http::{
    header::{HeaderName, HeaderValue},
    uri::Scheme,
    Method, StatusCode,
};
use regex::Regex;
use std::num::NonZeroU16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRouteMatch {
    pub path: Option<PathMatch>,
    pub headers: Vec<HeaderMatch>,
    pub query_params: Vec<QueryParamMatch>,
    pub method: Option<Method>,
}

#[derive(Clone, Debug)]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

#[derive(Clone, Debug)]
pub enum HeaderMatch {
    Exact(HeaderName, HeaderValue),
    Regex(HeaderName, Regex),
}

#[derive(Clone, Debug)]
pub enum QueryParamMatch {
    Exact(String, String),
    Regex(String, Regex),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    RequestHeaderModifier(HeaderModifierFilter),
    ResponseHeaderModifier(HeaderModifierFilter),
    RequestRedirect(RequestRedirectFilter),
    UrlRewrite(UrlRewriteFilter),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderModifierFilter {
    pub add: Vec<(HeaderName, HeaderValue)>,
    pub set: Vec<(HeaderName, HeaderValue)>,
    pub remove: Vec<HeaderName>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestRedirectFilter {
    pub scheme: Option<Scheme>,
    pub host: Option<String>,
    pub path: Option<PathModifier>,
    pub port: Option<NonZeroU16>,
    pub status: Option<StatusCode>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlRewriteFilter {
    pub host: Option<String>,
    pub path: Option<PathModifier>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathModifier {
    Full(String),
    Prefix(String),
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum MatchError {
    #[error("invalid regular expression {0:?}: {1}")]
    Regex(String, #[source] regex::Error),

    #[error("invalid header name {0:?}")]
    HeaderName(String),

    #[error("invalid header value for {0}")]
    HeaderValue(String),

    #[error("invalid method {0:?}")]
    Method(String),

    #[error("invalid scheme {0:?}")]
    Scheme(String),

    #[error("invalid status code {0}")]
    StatusCode(u16),

    #[error("unsupported match type {0:?}")]
    UnsupportedType(String),

    #[error("paths must be absolute (begin with `/`); {0:?} is not an absolute path")]
    RelativePath(String),
}

// === impl HttpRouteMatch ===

impl HttpRouteMatch {
    /// The match used by rules that do not declare any.
    pub fn any_path() -> Self {
        Self {
            path: Some(PathMatch::Prefix("/".to_string())),
            headers: vec![],
            query_params: vec![],
            method: None,
        }
    }
}

// === impl PathMatch ===

impl PartialEq for PathMatch {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(l0), Self::Exact(r0)) => l0 == r0,
            (Self::Prefix(l0), Self::Prefix(r0)) => l0 == r0,
            (Self::Regex(l0), Self::Regex(r0)) => l0.as_str() == r0.as_str(),
            _ => false,
        }
    }
}

impl Eq for PathMatch {}

impl PathMatch {
    pub fn regex(s: &str) -> Result<Self, MatchError> {
        Regex::new(s)
            .map(Self::Regex)
            .map_err(|e| MatchError::Regex(s.to_string(), e))
    }

    /// Returns the length of the matched path, used to order routes so that
    /// longer, more specific paths are tried first.
    pub fn specificity(&self) -> (u8, usize) {
        match self {
            Self::Exact(p) => (2, p.len()),
            Self::Regex(r) => (1, r.as_str().len()),
            Self::Prefix(p) => (0, p.len()),
        }
    }
}

// === impl HeaderMatch ===

impl PartialEq for HeaderMatch {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(n0, v0), Self::Exact(n1, v1)) => n0 == n1 && v0 == v1,
            (Self::Regex(n0, r0), Self::Regex(n1, r1)) => n0 == n1 && r0.as_str() == r1.as_str(),
            _ => false,
        }
    }
}

impl Eq for HeaderMatch {}

impl HeaderMatch {
    pub fn parse(kind: Option<&str>, name: &str, value: &str) -> Result<Self, MatchError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| MatchError::HeaderName(name.to_string()))?;
        match kind.unwrap_or("Exact") {
            "Exact" => {
                let value = HeaderValue::from_str(value)
                    .map_err(|_| MatchError::HeaderValue(name.to_string()))?;
                Ok(Self::Exact(name, value))
            }
            "RegularExpression" => Regex::new(value)
                .map(|r| Self::Regex(name, r))
                .map_err(|e| MatchError::Regex(value.to_string(), e)),
            other => Err(MatchError::UnsupportedType(other.to_string())),
        }
    }
}

// === impl QueryParamMatch ===

impl PartialEq for QueryParamMatch {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(n0, v0), Self::Exact(n1, v1)) => n0 == n1 && v0 == v1,
            (Self::Regex(n0, r0), Self::Regex(n1, r1)) => n0 == n1 && r0.as_str() == r1.as_str(),
            _ => false,
        }
    }
}

impl Eq for QueryParamMatch {}

impl QueryParamMatch {
    pub fn parse(kind: Option<&str>, name: &str, value: &str) -> Result<Self, MatchError> {
        match kind.unwrap_or("Exact") {
            "Exact" => Ok(Self::Exact(name.to_string(), value.to_string())),
            "RegularExpression" => Regex::new(value)
                .map(|r| Self::Regex(name.to_string(), r))
                .map_err(|e| MatchError::Regex(value.to_string(), e)),
            other => Err(MatchError::UnsupportedType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_matches_compare_by_pattern() {
        assert_eq!(PathMatch::regex("/a.*").unwrap(), PathMatch::regex("/a.*").unwrap());
        assert_ne!(PathMatch::regex("/a.*").unwrap(), PathMatch::Prefix("/a.*".to_string()));
        assert_eq!(
            HeaderMatch::parse(Some("RegularExpression"), "x-id", "[0-9]+").unwrap(),
            HeaderMatch::parse(Some("RegularExpression"), "X-Id", "[0-9]+").unwrap(),
        );
    }

    #[test]
    fn rejects_invalid_matches() {
        assert!(PathMatch::regex("(").is_err());
        assert!(HeaderMatch::parse(None, "bad header", "v").is_err());
        assert!(QueryParamMatch::parse(Some("Glob"), "q", "*").is_err());
    }

    #[test]
    fn exact_paths_are_most_specific() {
        let exact = PathMatch::Exact("/a".to_string());
        let prefix = PathMatch::Prefix("/a/b/c".to_string());
        assert!(exact.specificity() > prefix.specificity());
    }
}
