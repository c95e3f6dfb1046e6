use url::Url;

/// Extract the `host` or `host:port` token from a URL.
///
/// The host comes back lower-cased. The port is only included when it is
/// explicit and not the scheme default. Anything that does not parse as an
/// absolute URL with a host yields an empty string.
pub fn extract_domain(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    let Some(host) = parsed.host_str() else {
        return String::new();
    };
    match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Split `host[:port]`. Only a trailing all-digit segment counts as a port,
/// so bracketed IPv6 hosts without a port stay intact.
fn split_host_port(s: &str) -> (&str, Option<&str>) {
    match s.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            (host, Some(port))
        }
        _ => (s, None),
    }
}

/// Match a `host[:port]` domain against a provider pattern.
///
/// Patterns are either an exact `host[:port]` or a `*.suffix[:port]` wildcard.
/// A wildcard covers the bare suffix and any subdomain of it, but never a host
/// that only happens to end with the same characters.
pub fn domain_matches_pattern(domain: &str, pattern: &str) -> bool {
    let (domain_host, domain_port) = split_host_port(domain);
    let pattern = pattern.trim().to_ascii_lowercase();
    let (pattern_host, pattern_port) = split_host_port(&pattern);

    if let Some(pp) = pattern_port {
        if domain_port != Some(pp) {
            return false;
        }
    }

    let domain_host = domain_host.to_ascii_lowercase();

    match pattern_host.strip_prefix("*.") {
        Some(suffix) => {
            domain_host == suffix
                || domain_host
                    .strip_suffix(suffix)
                    .is_some_and(|rest| rest.ends_with('.'))
        }
        None => domain_host == pattern_host,
    }
}

/// True if the domain matches any of the patterns. An empty domain never matches.
pub fn matches_any<S: AsRef<str>>(domain: &str, patterns: &[S]) -> bool {
    !domain.is_empty()
        && patterns
            .iter()
            .any(|p| domain_matches_pattern(domain, p.as_ref()))
}
