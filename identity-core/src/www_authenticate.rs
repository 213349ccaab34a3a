//! Helpers for the `WWW-Authenticate` bearer challenge parameter list.
//!
//! Identity-aware APIs answer 401 with a comma-separated parameter list such
//! as `Bearer consentUri="https://...", proposedAction="consent"` or, for a
//! continuous-access-evaluation challenge, a `claims="..."` parameter.

use http::HeaderMap;
use http::header::WWW_AUTHENTICATE;

/// Fetches a named parameter from a bearer challenge header value.
///
/// Parameter names compare case-insensitively; surrounding quotes are
/// stripped from the value. Values themselves may contain `=` (base64
/// padding), so only the first `=` splits key from value.
pub fn bearer_parameter(header_value: &str, name: &str) -> Option<String> {
    let parameters = header_value
        .trim()
        .strip_prefix("Bearer")
        .unwrap_or(header_value);

    for parameter in parameters.split(',') {
        let mut parts = parameter.splitn(2, '=');
        let key = parts.next()?.trim();
        if !key.eq_ignore_ascii_case(name) {
            continue;
        }
        if let Some(value) = parts.next() {
            return Some(value.trim().trim_matches('"').to_string());
        }
    }

    None
}

/// Extracts the `claims` challenge from a response's `WWW-Authenticate`
/// headers, if any of them carries one.
pub fn claims_challenge(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| bearer_parameter(value, "claims"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONSENT_CHALLENGE: &str = r#"Bearer consentUri="https://login.example.net/common/adminconsent?client_id=5ed..a5c", interaction_info="pending", proposedAction="consent""#;

    #[test]
    fn fetches_named_parameter() {
        assert_eq!(
            bearer_parameter(CONSENT_CHALLENGE, "proposedAction").as_deref(),
            Some("consent")
        );
        assert_eq!(
            bearer_parameter(CONSENT_CHALLENGE, "consentUri").as_deref(),
            Some("https://login.example.net/common/adminconsent?client_id=5ed..a5c")
        );
    }

    #[test]
    fn parameter_names_are_case_insensitive() {
        assert_eq!(
            bearer_parameter(CONSENT_CHALLENGE, "proposedaction").as_deref(),
            Some("consent")
        );
    }

    #[test]
    fn missing_parameter_is_none() {
        assert_eq!(bearer_parameter(CONSENT_CHALLENGE, "claims"), None);
    }

    #[test]
    fn base64_padding_survives_in_values() {
        let header = r#"Bearer realm="", claims="eyJhY2Nlc3NfdG9rZW4iOnt9fQ==""#;
        assert_eq!(
            bearer_parameter(header, "claims").as_deref(),
            Some("eyJhY2Nlc3NfdG9rZW4iOnt9fQ==")
        );
    }

    #[test]
    fn claims_challenge_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            WWW_AUTHENTICATE,
            r#"Bearer authorization_uri="https://login.example.net/tid/oauth2/authorize", error="insufficient_claims", claims="eyJhY2Nlc3MifX0=""#
                .parse()
                .unwrap(),
        );

        assert_eq!(
            claims_challenge(&headers).as_deref(),
            Some("eyJhY2Nlc3MifX0=")
        );
    }

    #[test]
    fn claims_challenge_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(WWW_AUTHENTICATE, "Bearer realm=\"\"".parse().unwrap());
        assert_eq!(claims_challenge(&headers), None);
    }
}
