use gateway_controller_core::{
    annotations::RedirectStatusCodes,
    http_route::{
        Filter, HeaderMatch, HeaderModifierFilter, HeaderName, HeaderValue, HttpRouteMatch,
        MatchError, Method, PathMatch, PathModifier, QueryParamMatch, RequestRedirectFilter,
        Scheme, StatusCode, UrlRewriteFilter,
    },
    source::{HttpRuleSource, RouteSpecError},
};
use gateway_controller_k8s_api::routes as api;
use std::num::NonZeroU16;

pub(super) fn convert_rules(
    rules: &[api::HttpRouteRule],
    redirect_codes: Option<&RedirectStatusCodes>,
    namespace: &str,
) -> Result<Vec<HttpRuleSource>, RouteSpecError> {
    rules
        .iter()
        .map(|rule| {
            let status = redirect_codes.and_then(|c| c.for_rule(rule.name.as_deref()));
            let matches = if rule.matches.is_empty() {
                vec![HttpRouteMatch::any_path()]
            } else {
                rule.matches
                    .iter()
                    .map(try_match)
                    .collect::<Result<_, _>>()?
            };
            let filters = rule
                .filters
                .iter()
                .map(|f| filter(f, status))
                .collect::<Result<_, _>>()?;
            Ok(HttpRuleSource {
                name: rule.name.clone(),
                matches,
                filters,
                backends: rule
                    .backend_refs
                    .iter()
                    .map(|b| super::backend_ref(b, namespace))
                    .collect(),
            })
        })
        .collect()
}

pub(super) fn try_match(
    api::HttpRouteMatch {
        path,
        headers,
        query_params,
        method,
    }: &api::HttpRouteMatch,
) -> Result<HttpRouteMatch, MatchError> {
    let path = path
        .as_ref()
        .map(path_match)
        .transpose()?
        .or_else(|| Some(PathMatch::Prefix("/".to_string())));

    let headers = headers
        .iter()
        .map(header_match)
        .collect::<Result<_, _>>()?;

    let query_params = query_params
        .iter()
        .map(|q| QueryParamMatch::parse(q.r#type.as_deref(), &q.name, &q.value))
        .collect::<Result<_, _>>()?;

    let method = method
        .as_deref()
        .map(|m| Method::from_bytes(m.as_bytes()).map_err(|_| MatchError::Method(m.to_string())))
        .transpose()?;

    Ok(HttpRouteMatch {
        path,
        headers,
        query_params,
        method,
    })
}

fn path_match(path_match: &api::HttpPathMatch) -> Result<PathMatch, MatchError> {
    match path_match {
        api::HttpPathMatch::Exact { value } | api::HttpPathMatch::PathPrefix { value }
            if !value.starts_with('/') =>
        {
            Err(MatchError::RelativePath(value.clone()))
        }
        api::HttpPathMatch::Exact { value } => Ok(PathMatch::Exact(value.clone())),
        api::HttpPathMatch::PathPrefix { value } => Ok(PathMatch::Prefix(value.clone())),
        api::HttpPathMatch::RegularExpression { value } => PathMatch::regex(value),
    }
}

pub(super) fn header_match(m: &api::HttpHeaderMatch) -> Result<HeaderMatch, MatchError> {
    HeaderMatch::parse(m.r#type.as_deref(), &m.name, &m.value)
}

/// Converts a route filter. `redirect_status` overrides the status code of
/// redirect filters.
pub(super) fn filter(
    filter: &api::HttpRouteFilter,
    redirect_status: Option<u16>,
) -> Result<Filter, MatchError> {
    match filter {
        api::HttpRouteFilter::RequestHeaderModifier {
            request_header_modifier,
        } => header_modifier(request_header_modifier).map(Filter::RequestHeaderModifier),
        api::HttpRouteFilter::ResponseHeaderModifier {
            response_header_modifier,
        } => header_modifier(response_header_modifier).map(Filter::ResponseHeaderModifier),
        api::HttpRouteFilter::RequestRedirect { request_redirect } => {
            req_redirect(request_redirect, redirect_status).map(Filter::RequestRedirect)
        }
        api::HttpRouteFilter::UrlRewrite { url_rewrite } => Ok(Filter::UrlRewrite(UrlRewriteFilter {
            host: url_rewrite.hostname.clone(),
            path: url_rewrite.path.as_ref().map(path_modifier).transpose()?,
        })),
    }
}

fn header_modifier(
    api::HttpHeaderFilter { set, add, remove }: &api::HttpHeaderFilter,
) -> Result<HeaderModifierFilter, MatchError> {
    fn header(h: &api::HttpHeader) -> Result<(HeaderName, HeaderValue), MatchError> {
        let name = header_name(&h.name)?;
        let value =
            HeaderValue::from_str(&h.value).map_err(|_| MatchError::HeaderValue(h.name.clone()))?;
        Ok((name, value))
    }

    Ok(HeaderModifierFilter {
        add: add.iter().map(header).collect::<Result<_, _>>()?,
        set: set.iter().map(header).collect::<Result<_, _>>()?,
        remove: remove
            .iter()
            .map(|n| header_name(n))
            .collect::<Result<_, _>>()?,
    })
}

fn header_name(name: &str) -> Result<HeaderName, MatchError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| MatchError::HeaderName(name.to_string()))
}

fn req_redirect(
    api::HttpRequestRedirectFilter {
        scheme,
        hostname,
        path,
        port,
        status_code,
    }: &api::HttpRequestRedirectFilter,
    status_override: Option<u16>,
) -> Result<RequestRedirectFilter, MatchError> {
    let scheme = scheme
        .as_deref()
        .map(|s| s.parse::<Scheme>().map_err(|_| MatchError::Scheme(s.to_string())))
        .transpose()?;
    let status = status_override
        .or(*status_code)
        .map(|c| StatusCode::from_u16(c).map_err(|_| MatchError::StatusCode(c)))
        .transpose()?;
    Ok(RequestRedirectFilter {
        scheme,
        host: hostname.clone(),
        path: path.as_ref().map(path_modifier).transpose()?,
        port: port.and_then(NonZeroU16::new),
        status,
    })
}

fn path_modifier(path_modifier: &api::HttpPathModifier) -> Result<PathModifier, MatchError> {
    use api::HttpPathModifier::*;
    match path_modifier {
        ReplaceFullPath {
            replace_full_path: path,
        }
        | ReplacePrefixMatch {
            replace_prefix_match: path,
        } if !path.starts_with('/') => Err(MatchError::RelativePath(path.clone())),
        ReplaceFullPath { replace_full_path } => Ok(PathModifier::Full(replace_full_path.clone())),
        ReplacePrefixMatch {
            replace_prefix_match,
        } => Ok(PathModifier::Prefix(replace_prefix_match.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_relative_paths() {
        let m = api::HttpRouteMatch {
            path: Some(api::HttpPathMatch::PathPrefix {
                value: "foo".to_string(),
            }),
            ..Default::default()
        };
        assert!(matches!(try_match(&m), Err(MatchError::RelativePath(_))));
    }

    #[test]
    fn converts_matches() {
        let m = api::HttpRouteMatch {
            path: Some(api::HttpPathMatch::Exact {
                value: "/login".to_string(),
            }),
            headers: vec![api::HttpHeaderMatch {
                r#type: None,
                name: "x-env".to_string(),
                value: "canary".to_string(),
            }],
            query_params: vec![api::HttpQueryParamMatch {
                r#type: Some("RegularExpression".to_string()),
                name: "id".to_string(),
                value: "[0-9]+".to_string(),
            }],
            method: Some("POST".to_string()),
        };
        let converted = try_match(&m).expect("match must convert");
        assert_eq!(converted.path, Some(PathMatch::Exact("/login".to_string())));
        assert_eq!(converted.method, Some(Method::POST));
        assert_eq!(
            converted.headers,
            vec![HeaderMatch::Exact(
                HeaderName::from_static("x-env"),
                HeaderValue::from_static("canary")
            )]
        );
        assert_eq!(converted.query_params.len(), 1);
    }

    #[test]
    fn header_modifiers() {
        let f = api::HttpRouteFilter::ResponseHeaderModifier {
            response_header_modifier: api::HttpHeaderFilter {
                set: vec![api::HttpHeader {
                    name: "x-frame-options".to_string(),
                    value: "deny".to_string(),
                }],
                add: vec![],
                remove: vec!["server".to_string()],
            },
        };
        assert_eq!(
            filter(&f, None).expect("filter must convert"),
            Filter::ResponseHeaderModifier(HeaderModifierFilter {
                add: vec![],
                set: vec![(
                    HeaderName::from_static("x-frame-options"),
                    HeaderValue::from_static("deny")
                )],
                remove: vec![HeaderName::from_static("server")],
            })
        );

        let bad = api::HttpRouteFilter::RequestHeaderModifier {
            request_header_modifier: api::HttpHeaderFilter {
                remove: vec!["bad header".to_string()],
                ..Default::default()
            },
        };
        assert!(filter(&bad, None).is_err());
    }

    #[test]
    fn redirect_rejects_bad_status_codes() {
        let f = api::HttpRouteFilter::RequestRedirect {
            request_redirect: api::HttpRequestRedirectFilter {
                status_code: Some(42),
                ..Default::default()
            },
        };
        assert!(matches!(filter(&f, None), Err(MatchError::StatusCode(42))));
    }
}
