//! Local inspection of stored bearer tokens.
//!
//! Nothing here verifies a signature; the client has no key to do so. The
//! checks only keep obviously stale or damaged tokens from resurrecting a
//! session at startup.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Non-empty, printable ASCII with no whitespace: what an HTTP bearer
/// header can carry.
pub fn is_well_formed(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_graphic())
}

/// The `exp` claim of a JWT-shaped token, if it has one.
///
/// Opaque tokens and JWTs without `exp` return `None`.
pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp?, 0)
}

/// True when the token carries an `exp` that falls before `now + leeway`.
/// Tokens whose expiry cannot be read are not considered expired.
pub fn is_expired_at(token: &str, now: DateTime<Utc>, leeway: Duration) -> bool {
    expires_at(token).is_some_and(|exp| exp <= now + leeway)
}

pub fn is_expired(token: &str, leeway: Duration) -> bool {
    is_expired_at(token, Utc::now(), leeway)
}

#[cfg(test)]
pub(crate) fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"1","exp":{}}}"#, exp));
    format!("{}.{}.signature", header, payload)
}
