use gateway_controller_core::{
    http_route::{HttpRouteMatch, MatchError, Method, PathMatch},
    source::{HttpRuleSource, RouteSpecError},
};
use gateway_controller_k8s_api::routes as api;

const ANY_SEGMENT: &str = "[^/]+";

pub(super) fn convert_rules(
    rules: &[api::GrpcRouteRule],
    namespace: &str,
) -> Result<Vec<HttpRuleSource>, RouteSpecError> {
    rules
        .iter()
        .map(|rule| {
            let matches = if rule.matches.is_empty() {
                vec![HttpRouteMatch {
                    method: Some(Method::POST),
                    ..HttpRouteMatch::any_path()
                }]
            } else {
                rule.matches
                    .iter()
                    .map(try_match)
                    .collect::<Result<_, _>>()?
            };
            let filters = rule
                .filters
                .iter()
                .map(|f| super::http::filter(f, None))
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

/// Converts a gRPC match into an HTTP match on `POST /{service}/{method}`.
fn try_match(m: &api::GrpcRouteMatch) -> Result<HttpRouteMatch, MatchError> {
    let path = match &m.method {
        None => PathMatch::Prefix("/".to_string()),
        Some(method) => method_path(method)?,
    };
    let headers = m
        .headers
        .iter()
        .map(super::http::header_match)
        .collect::<Result<_, _>>()?;
    Ok(HttpRouteMatch {
        path: Some(path),
        headers,
        query_params: vec![],
        method: Some(Method::POST),
    })
}

fn method_path(m: &api::GrpcMethodMatch) -> Result<PathMatch, MatchError> {
    let service = m.service.as_deref().filter(|s| !s.is_empty());
    let method = m.method.as_deref().filter(|s| !s.is_empty());
    match m.r#type.as_deref().unwrap_or("Exact") {
        "Exact" => match (service, method) {
            (Some(s), Some(m)) => Ok(PathMatch::Exact(format!("/{s}/{m}"))),
            (Some(s), None) => Ok(PathMatch::Prefix(format!("/{s}/"))),
            (None, Some(m)) => PathMatch::regex(&format!("/{ANY_SEGMENT}/{}", regex::escape(m))),
            (None, None) => Ok(PathMatch::Prefix("/".to_string())),
        },
        "RegularExpression" => PathMatch::regex(&format!(
            "/{}/{}",
            service.unwrap_or(ANY_SEGMENT),
            method.unwrap_or(ANY_SEGMENT)
        )),
        other => Err(MatchError::UnsupportedType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(None, Some("foo.Bar"), Some("Get"), PathMatch::Exact("/foo.Bar/Get".to_string()))]
    #[case(None, Some("foo.Bar"), None, PathMatch::Prefix("/foo.Bar/".to_string()))]
    #[case(None, None, Some("Get"), PathMatch::Regex(regex::Regex::new("/[^/]+/Get").unwrap()))]
    #[case(
        Some("RegularExpression"),
        Some("foo\\..*"),
        None,
        PathMatch::Regex(regex::Regex::new("/foo\\..*/[^/]+").unwrap())
    )]
    fn method_paths(
        #[case] kind: Option<&str>,
        #[case] service: Option<&str>,
        #[case] method: Option<&str>,
        #[case] expected: PathMatch,
    ) {
        let m = api::GrpcMethodMatch {
            r#type: kind.map(str::to_string),
            service: service.map(str::to_string),
            method: method.map(str::to_string),
        };
        assert_eq!(method_path(&m).unwrap(), expected);
    }

    #[test]
    fn grpc_matches_require_post() {
        let rules = convert_rules(
            &[api::GrpcRouteRule {
                name: None,
                matches: vec![],
                filters: vec![],
                backend_refs: vec![],
            }],
            "default",
        )
        .unwrap();
        assert_eq!(rules[0].matches[0].method, Some(Method::POST));
    }
}
