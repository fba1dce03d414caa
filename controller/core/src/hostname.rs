/// Computes the hostnames a route serves under a listener.
///
/// A listener without a hostname passes every route hostname through. A
/// wildcard listener hostname (`*.example.com`) keeps the route hostnames that
/// end with its suffix; a route without hostnames inherits the listener
/// hostname. An exact listener hostname matches an equal route hostname, or a
/// wildcard route hostname whose suffix it carries.
///
/// Returns `None` if the route and listener hostnames do not intersect.
pub fn intersect(
    listener_hostname: Option<&str>,
    route_hostnames: &[String],
) -> Option<Vec<String>> {
    let Some(listener) = listener_hostname else {
        return Some(route_hostnames.to_vec());
    };

    if let Some(suffix) = listener.strip_prefix('*') {
        if suffix.starts_with('.') {
            if route_hostnames.is_empty() {
                return Some(vec![listener.to_string()]);
            }
            let matched = route_hostnames
                .iter()
                .filter(|h| h.ends_with(suffix))
                .cloned()
                .collect::<Vec<_>>();
            return if matched.is_empty() { None } else { Some(matched) };
        }
    }

    if route_hostnames.is_empty() {
        return Some(vec![listener.to_string()]);
    }
    for host in route_hostnames {
        if host == listener {
            return Some(vec![listener.to_string()]);
        }
        if let Some(suffix) = host.strip_prefix('*') {
            if suffix.starts_with('.') && listener.ends_with(suffix) {
                return Some(vec![listener.to_string()]);
            }
        }
    }
    None
}

/// Returns true if the virtual host `host` falls under a listener's hostname.
pub fn is_host_contained(host: &str, listener_hostname: Option<&str>) -> bool {
    let Some(listener) = listener_hostname else {
        return true;
    };
    if let Some(suffix) = listener.strip_prefix('*') {
        if suffix.starts_with('.') && host.ends_with(suffix) {
            return true;
        }
    }
    host == listener
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn hosts(hs: &[&str]) -> Vec<String> {
        hs.iter().map(|h| h.to_string()).collect()
    }

    #[rstest]
    #[case(None, &["a.com", "b.com"], Some(&["a.com", "b.com"][..]))]
    #[case(None, &[], Some(&[][..]))]
    #[case(Some("*.example.com"), &[], Some(&["*.example.com"][..]))]
    #[case(Some("*.example.com"), &["foo.example.com", "foo.other.com"], Some(&["foo.example.com"][..]))]
    #[case(Some("*.example.com"), &["example.com"], None)]
    #[case(Some("foo.example.com"), &[], Some(&["foo.example.com"][..]))]
    #[case(Some("foo.example.com"), &["foo.example.com"], Some(&["foo.example.com"][..]))]
    #[case(Some("foo.example.com"), &["*.example.com"], Some(&["foo.example.com"][..]))]
    #[case(Some("foo.example.com"), &["bar.example.com"], None)]
    fn intersects(
        #[case] listener: Option<&str>,
        #[case] routes: &[&str],
        #[case] expected: Option<&[&str]>,
    ) {
        assert_eq!(
            intersect(listener, &hosts(routes)),
            expected.map(hosts),
            "listener={listener:?} routes={routes:?}"
        );
    }

    #[test]
    fn wildcard_listener_accepts_exactly_its_suffix() {
        let candidates = [
            "a.example.com",
            "a.b.example.com",
            "*.example.com",
            "example.com",
            "aexample.com",
            "a.example.com.evil",
            "",
        ];
        for h in candidates {
            let accepted = intersect(Some("*.example.com"), &hosts(&[h])).is_some();
            let expected = h.ends_with(".example.com") || h == "*.example.com";
            assert_eq!(accepted, expected, "{h:?}");
        }
    }

    #[rstest]
    #[case("foo.example.com", None, true)]
    #[case("foo.example.com", Some("*.example.com"), true)]
    #[case("foo.example.com", Some("foo.example.com"), true)]
    #[case("*", Some("foo.example.com"), false)]
    #[case("example.com", Some("*.example.com"), false)]
    fn host_contained(#[case] host: &str, #[case] listener: Option<&str>, #[case] expected: bool) {
        assert_eq!(is_host_contained(host, listener), expected);
    }
}
