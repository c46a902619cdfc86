//! OAuth 1.0a request signing (HMAC-SHA1).

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::config::AppCredentials;
use crate::credentials::AccessToken;

type HmacSha1 = Hmac<Sha1>;

/// Per-request values that must differ between requests.
#[derive(Debug, Clone)]
pub struct Nonce {
    pub nonce: String,
    pub timestamp: u64,
}

impl Nonce {
    pub fn fresh() -> Self {
        Self {
            nonce: crate::util::nonce(32),
            timestamp: crate::util::now_secs(),
        }
    }
}

/// RFC 3986 percent-encoding (unreserved characters pass through).
fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

fn protocol_params(app: &AppCredentials, token: &AccessToken, nonce: &Nonce) -> Vec<(String, String)> {
    vec![
        ("oauth_consumer_key".into(), app.key.clone()),
        ("oauth_nonce".into(), nonce.nonce.clone()),
        ("oauth_signature_method".into(), "HMAC-SHA1".into()),
        ("oauth_timestamp".into(), nonce.timestamp.to_string()),
        ("oauth_token".into(), token.token.clone()),
        ("oauth_version".into(), "1.0".into()),
    ]
}

/// Signature base string: `METHOD&url&sorted-params`, each part encoded.
pub fn signature_base(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    encoded.sort();

    let joined = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(url),
        encode(&joined)
    )
}

pub fn sign(base: &str, consumer_secret: &str, token_secret: &str) -> anyhow::Result<String> {
    let key = format!("{}&{}", encode(consumer_secret), encode(token_secret));
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid signing key: {e}"))?;
    mac.update(base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Builds the `Authorization` header value for a request whose body
/// (or query) carries `request_params`.
pub fn authorization_header(
    method: &str,
    url: &str,
    request_params: &[(String, String)],
    app: &AppCredentials,
    token: &AccessToken,
    nonce: &Nonce,
) -> anyhow::Result<String> {
    let mut oauth = protocol_params(app, token, nonce);

    let mut all = oauth.clone();
    all.extend(request_params.iter().cloned());

    let base = signature_base(method, url, &all);
    oauth.push(("oauth_signature".into(), sign(&base, &app.secret, &token.secret)?));

    let fields = oauth
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!("OAuth {fields}"))
}
