//! Carrier webhook signature validation.
//!
//! The carrier signs each webhook by sorting the form parameters by key,
//! concatenating `key + value` pairs onto the full request URL, and taking an
//! HMAC-SHA1 over the result with the account auth token. The base64 of that
//! digest arrives in the `X-Twilio-Signature` header.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::HashMap;

type HmacSha1 = Hmac<Sha1>;

fn signing_input(url: &str, params: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();

    let mut data = String::from(url);
    for key in keys {
        data.push_str(key);
        data.push_str(&params[key]);
    }
    data
}

/// Compute the expected signature for a request.
pub fn compute_signature(auth_token: &str, url: &str, params: &HashMap<String, String>) -> String {
    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(signing_input(url, params).as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Validate a provided signature in constant time.
///
/// Returns false on any malformed input rather than erroring; a webhook with
/// a bad signature is rejected, never retried.
pub fn validate_signature(
    auth_token: &str,
    url: &str,
    params: &HashMap<String, String>,
    provided: &str,
) -> bool {
    let Ok(mut mac) = HmacSha1::new_from_slice(auth_token.as_bytes()) else {
        return false;
    };
    mac.update(signing_input(url, params).as_bytes());

    let Ok(expected) = BASE64.decode(provided.trim()) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}
