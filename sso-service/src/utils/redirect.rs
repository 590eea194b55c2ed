//! Post-login redirect targets.

use url::Url;

const USERS_CONSOLE_PREFIX: &str = "https://users";
const LOGIN_PREFIX: &str = "https://login";

/// Splits `host[:port]`. Bare IPv6 literals are returned whole.
pub fn split_host_port(host: &str) -> (&str, Option<&str>) {
    match host.rsplit_once(':') {
        Some((name, port))
            if !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && (!name.contains(':') || name.ends_with(']')) =>
        {
            (name, Some(port))
        }
        _ => (host, None),
    }
}

/// Domain a login cookie is scoped to, with a leading dot.
///
/// `login.corp.example.com` yields `.corp.example.com`; a registrable
/// domain such as `example.com` yields `.example.com`.
pub fn cookie_domain(host: &str) -> String {
    let (name, _) = split_host_port(host);
    let name = name.trim_end_matches('.');
    if name.matches('.').count() >= 2 {
        if let Some(dot) = name.find('.') {
            return name[dot..].to_string();
        }
    }
    format!(".{}", name)
}

/// Where to send the browser after login.
///
/// A stored target wins unless it points back at the login host. The
/// request's port is carried over when the target has none.
pub fn build_redirect_uri(host: &str, stored: Option<&str>) -> String {
    let default = format!("{}{}", USERS_CONSOLE_PREFIX, cookie_domain(host));

    let target = match stored {
        Some(uri) if !uri.is_empty() && !uri.starts_with(LOGIN_PREFIX) => uri.to_string(),
        _ => default,
    };

    let Some(port) = split_host_port(host).1.and_then(|p| p.parse::<u16>().ok()) else {
        return target;
    };

    match Url::parse(&target) {
        Ok(mut uri) if uri.port().is_none() => {
            if uri.set_port(Some(port)).is_ok() {
                uri.to_string()
            } else {
                target
            }
        }
        _ => target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_domain() {
        assert_eq!(cookie_domain("login.corp.example.com"), ".corp.example.com");
        assert_eq!(cookie_domain("login.corp.example.com:8443"), ".corp.example.com");
        assert_eq!(cookie_domain("example.com"), ".example.com");
    }

    #[test]
    fn test_default_target_is_users_console() {
        assert_eq!(
            build_redirect_uri("login.corp.example.com", None),
            "https://users.corp.example.com"
        );
    }

    #[test]
    fn test_stored_target_wins_unless_login() {
        assert_eq!(
            build_redirect_uri("login.corp.example.com", Some("https://wiki.corp.example.com/page")),
            "https://wiki.corp.example.com/page"
        );
        assert_eq!(
            build_redirect_uri("login.corp.example.com", Some("https://login.corp.example.com/")),
            "https://users.corp.example.com"
        );
    }

    #[test]
    fn test_request_port_is_carried_over() {
        assert_eq!(
            build_redirect_uri("login.corp.example.com:8443", None),
            "https://users.corp.example.com:8443/"
        );
        assert_eq!(
            build_redirect_uri("login.corp.example.com:8443", Some("https://wiki.corp.example.com:9000/x")),
            "https://wiki.corp.example.com:9000/x"
        );
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("host:80"), ("host", Some("80")));
        assert_eq!(split_host_port("host"), ("host", None));
        assert_eq!(split_host_port("[::1]:8443"), ("[::1]", Some("8443")));
        assert_eq!(split_host_port("::1"), ("::1", None));
    }
}
