//! AWS Signature Version 4 signing.
//!
//! Pure-Rust signing (`hmac` + `sha2`) shared by the object-store and
//! queue clients, plus the minimal XML helpers their responses need. No
//! C library dependencies, so it builds everywhere.

use chrono::{DateTime, Utc};
use dockside_core::StoreError;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials, usually loaded from the environment.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Present for temporary credentials / assumed roles.
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Load from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and
    /// optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self, StoreError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| StoreError::Credentials("AWS_ACCESS_KEY_ID not set".into()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| StoreError::Credentials("AWS_SECRET_ACCESS_KEY not set".into()))?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

/// One request's signing input.
pub struct SigningRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    /// Canonical URI, already percent-encoded, starting with `/`.
    pub uri: &'a str,
    /// Canonical query string: sorted, percent-encoded `k=v` pairs.
    pub query: &'a str,
    /// Hex SHA-256 of the request payload.
    pub payload_hash: &'a str,
    pub region: &'a str,
    pub service: &'a str,
}

/// Compute the SigV4 headers for a request: `authorization`,
/// `x-amz-date`, `x-amz-content-sha256`, and when a session token is
/// present, `x-amz-security-token`.
pub fn sign(
    request: &SigningRequest<'_>,
    creds: &AwsCredentials,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host".to_string(), request.host.to_string()),
        (
            "x-amz-content-sha256".to_string(),
            request.payload_hash.to_string(),
        ),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(token) = &creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.uri,
        request.query,
        canonical_headers,
        signed_headers,
        request.payload_hash
    );

    let credential_scope = format!(
        "{date_stamp}/{}/{}/aws4_request",
        request.region, request.service
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        &creds.secret_access_key,
        &date_stamp,
        request.region,
        request.service,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        creds.access_key_id
    );

    let mut out = vec![
        ("authorization".to_string(), authorization),
        ("x-amz-content-sha256".to_string(), request.payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date),
    ];
    if let Some(token) = &creds.session_token {
        out.push(("x-amz-security-token".to_string(), token.clone()));
    }
    out
}

/// Hex-encoded SHA-256 of data.
pub fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key:
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
pub fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{secret_key}").as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, keeping only unreserved characters.
pub fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

// ============================================================================
// Minimal XML helpers
// ============================================================================

/// Extract the text content of a simple, non-nested XML tag.
pub fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

/// Iterate the inner text of every `<tag>...</tag>` block.
pub fn xml_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find(&open) {
        let body_start = start + open.len();
        let Some(end) = remaining[body_start..].find(&close) else {
            break;
        };
        blocks.push(&remaining[body_start..body_start + end]);
        remaining = &remaining[body_start + end + close.len()..];
    }
    blocks
}

/// Decode the five XML entities queue payloads use.
pub fn xml_unescape(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
