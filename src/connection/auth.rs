// Adobe FME challenge/response authentication ("authmod=adobe"), the two
// round extension of the connect exchange used by FMLE-compatible encoders.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{rngs::StdRng, RngCore, SeedableRng};

use crate::error::{Result, RtmpError};
use crate::util::string_compare_constant_time;

/// Generates a 32-hex-digit challenge or salt value
pub fn generate_hex_challenge() -> String {
    let mut bytes = [0u8; 16];
    StdRng::from_os_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn md5_b64(data: &[u8]) -> String {
    let digest = md5::compute(data);
    STANDARD.encode(digest.0)
}

/// Computes the client's auth response given user/pass, the server's salt
/// and challenge, and the client's own challenge.
pub fn compute_response(user: &str, pass: &str, salt: &str, server_challenge: &str, client_challenge: &str) -> String {
    let h1 = md5_b64(format!("{}{}{}", user, salt, pass).as_bytes());
    md5_b64(format!("{}{}{}", h1, server_challenge, client_challenge).as_bytes())
}

/// Server-side: recomputes the expected response and compares in constant time
pub fn verify_response(
    user: &str,
    pass: &str,
    salt: &str,
    server_challenge: &str,
    client_challenge: &str,
    response: &str,
) -> bool {
    let expected = compute_response(user, pass, salt, server_challenge, client_challenge);
    string_compare_constant_time(&expected, response)
}

/// The `_error` description the server sends on the first `connect`
/// attempt, asking the client to retry with `authmod=adobe`.
pub const NEED_AUTH_PREFIX: &str = "code=403 need auth; authmod=adobe";

/// Parses the query parameters appended to `app`/`tcUrl` for the second
/// connect attempt (`?authmod=adobe&user=<U>`).
pub fn parse_auth_query(query: &str) -> AdobeAuthQuery {
    let mut out = AdobeAuthQuery::default();
    for pair in query.trim_start_matches('?').split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            match k {
                "user" => out.user = Some(v.to_string()),
                "salt" => out.salt = Some(v.to_string()),
                "challenge" => out.challenge = Some(v.to_string()),
                "response" => out.response = Some(v.to_string()),
                "authmod" => out.authmod = Some(v.to_string()),
                _ => {}
            }
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct AdobeAuthQuery {
    pub authmod: Option<String>,
    pub user: Option<String>,
    pub salt: Option<String>,
    pub challenge: Option<String>,
    pub response: Option<String>,
}

/// Formats the server's second `_error` description, carrying the salt and
/// its own challenge for the client to build a response against.
pub fn format_need_auth_description(user: &str, salt: &str, challenge: &str) -> String {
    format!("authmod=adobe ?reason=needauth&user={}&salt={}&challenge={}", user, salt, challenge)
}

pub const AUTH_FAILED_DESCRIPTION: &str = "authmod=adobe ?reason=authfailed";

/// Raised to the caller when a server response indicates Adobe auth is required
pub fn need_auth_error(salt: &str, challenge: &str) -> RtmpError {
    RtmpError::NeedAuth { salt: salt.to_string(), challenge: challenge.to_string() }
}

pub fn auth_failed_error() -> Result<()> {
    Err(RtmpError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_round_trip_matches() {
        let salt = generate_hex_challenge();
        let server_challenge = generate_hex_challenge();
        let client_challenge = generate_hex_challenge();

        let resp = compute_response("bob", "hunter2", &salt, &server_challenge, &client_challenge);
        assert!(verify_response("bob", "hunter2", &salt, &server_challenge, &client_challenge, &resp));
    }

    #[test]
    fn test_wrong_password_fails_verification() {
        let salt = generate_hex_challenge();
        let server_challenge = generate_hex_challenge();
        let client_challenge = generate_hex_challenge();

        let resp = compute_response("bob", "wrong", &salt, &server_challenge, &client_challenge);
        assert!(!verify_response("bob", "hunter2", &salt, &server_challenge, &client_challenge, &resp));
    }

    #[test]
    fn test_parse_auth_query() {
        let q = parse_auth_query("authmod=adobe&user=bob&salt=abc&challenge=def");
        assert_eq!(q.user.as_deref(), Some("bob"));
        assert_eq!(q.salt.as_deref(), Some("abc"));
        assert_eq!(q.challenge.as_deref(), Some("def"));
    }
}
