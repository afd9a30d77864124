//! Recovery-link parsing and address-bar rewriting.

use std::fmt;

/// Token pair carried by a recovery link.
#[derive(Clone, PartialEq, Eq)]
pub struct RecoveryTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for RecoveryTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// URL component the recovery marker was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerSource {
    Fragment,
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryLink {
    pub tokens: RecoveryTokens,
    pub source: MarkerSource,
}

impl RecoveryLink {
    /// Extracts the recovery tokens from `href`.
    ///
    /// A marker is `access_token=<value>` together with `type=recovery` in the
    /// same component. The fragment is checked first, then the query string.
    pub fn parse(href: &str) -> Option<Self> {
        find_marker(href, "recovery").map(|(tokens, source)| Self { tokens, source })
    }
}

/// Tokens carried by an emailed sign-in link (`type=magiclink`).
pub fn sign_in_tokens(href: &str) -> Option<RecoveryTokens> {
    find_marker(href, "magiclink").map(|(tokens, _)| tokens)
}

fn find_marker(href: &str, kind: &str) -> Option<(RecoveryTokens, MarkerSource)> {
    let (query, fragment) = split_components(href);
    [(fragment, MarkerSource::Fragment), (query, MarkerSource::Query)]
        .into_iter()
        .find_map(|(component, source)| Some((marker_in(component?, kind)?, source)))
}

/// Returns the `(query, fragment)` parts of `href`, without their `?`/`#`.
fn split_components(href: &str) -> (Option<&str>, Option<&str>) {
    let (before_fragment, fragment) = match href.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (href, None),
    };
    let query = before_fragment.split_once('?').map(|(_, q)| q);
    (query, fragment)
}

fn marker_in(component: &str, kind: &str) -> Option<RecoveryTokens> {
    if param(component, "type")? != kind {
        return None;
    }
    let access_token = param(component, "access_token").filter(|v| !v.is_empty())?;
    Some(RecoveryTokens {
        access_token: access_token.to_string(),
        refresh_token: param(component, "refresh_token")
            .filter(|v| !v.is_empty())
            .map(str::to_string),
    })
}

/// Raw value of `name` in `component`, up to the next `&`, `#` or end.
///
/// A fragment may itself look like a route (`/update-password?type=...`), so
/// `?` also separates parameters.
fn param<'a>(component: &'a str, name: &str) -> Option<&'a str> {
    component
        .split(['&', '?'])
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then_some(value)
        })
        .map(|value| value.split('#').next().unwrap_or(value))
}

/// Rewrites `href` to the hash route `route`, dropping any query or fragment.
pub fn rewrite_to_route(href: &str, route: &str) -> String {
    let end = href.find(['?', '#']).unwrap_or(href.len());
    format!("{}#{}", &href[..end], route)
}

/// The visible address of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    href: String,
}

impl Location {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    /// Replaces the current entry without adding to history.
    pub fn replace(&mut self, href: impl Into<String>) {
        self.href = href.into();
    }

    /// The hash route, e.g. `/update-password`, when the fragment is one.
    pub fn route(&self) -> Option<&str> {
        let (_, fragment) = split_components(&self.href);
        fragment
            .filter(|f| f.starts_with('/'))
            .map(|f| f.split(['?', '&']).next().unwrap_or(f))
    }

    pub fn carries_token(&self) -> bool {
        self.href.contains("access_token=")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fragment_marker() {
        let link = RecoveryLink::parse(
            "https://app.example/#access_token=abc123&refresh_token=def456&type=recovery",
        )
        .unwrap();
        assert_eq!(link.source, MarkerSource::Fragment);
        assert_eq!(link.tokens.access_token, "abc123");
        assert_eq!(link.tokens.refresh_token.as_deref(), Some("def456"));
    }

    #[test]
    fn test_parse_query_marker() {
        let link = RecoveryLink::parse("https://app.example/update-password?type=recovery&access_token=xyz").unwrap();
        assert_eq!(link.source, MarkerSource::Query);
        assert_eq!(link.tokens.access_token, "xyz");
        assert_eq!(link.tokens.refresh_token, None);
    }

    #[test]
    fn test_query_value_stops_at_fragment() {
        let link = RecoveryLink::parse("https://app.example/?access_token=q1&type=recovery#/login").unwrap();
        assert_eq!(link.tokens.access_token, "q1");
    }

    #[test]
    fn test_marker_requires_recovery_type() {
        assert!(RecoveryLink::parse("https://app.example/#access_token=abc&type=signup").is_none());
        assert!(RecoveryLink::parse("https://app.example/#access_token=abc").is_none());
        assert!(RecoveryLink::parse("https://app.example/#type=recovery").is_none());
        assert!(RecoveryLink::parse("https://app.example/login").is_none());
    }

    #[test]
    fn test_sign_in_link_is_not_a_recovery_link() {
        let href = "https://app.example#access_token=m1&refresh_token=r1&type=magiclink";
        assert!(RecoveryLink::parse(href).is_none());
        let tokens = sign_in_tokens(href).unwrap();
        assert_eq!(tokens.access_token, "m1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("r1"));
        assert!(sign_in_tokens("https://app.example/#access_token=abc&type=recovery").is_none());
    }

    #[test]
    fn test_marker_must_share_a_component() {
        assert!(RecoveryLink::parse("https://app.example/?type=recovery#access_token=abc").is_none());
    }

    #[test]
    fn test_fragment_route_with_parameters() {
        let link = RecoveryLink::parse("https://app.example/#/update-password?access_token=t&type=recovery").unwrap();
        assert_eq!(link.tokens.access_token, "t");
    }

    #[test]
    fn test_rewrite_to_route() {
        assert_eq!(
            rewrite_to_route(
                "https://app.example/#access_token=abc123&refresh_token=def456&type=recovery",
                "/update-password"
            ),
            "https://app.example/#/update-password"
        );
        assert_eq!(
            rewrite_to_route("https://app.example/reset?access_token=a&type=recovery", "/update-password"),
            "https://app.example/reset#/update-password"
        );
    }

    #[test]
    fn test_location_route() {
        let mut location = Location::new("https://app.example/#access_token=a&type=recovery");
        assert_eq!(location.route(), None);
        assert!(location.carries_token());
        location.replace("https://app.example/#/update-password");
        assert_eq!(location.route(), Some("/update-password"));
        assert!(!location.carries_token());
    }

    #[test]
    fn test_tokens_debug_is_redacted() {
        let tokens = RecoveryTokens {
            access_token: "secret".to_string(),
            refresh_token: Some("secret2".to_string()),
        };
        assert!(!format!("{:?}", tokens).contains("secret"));
    }
}
