//! Detached HTTP signatures
//!
//! Builds and verifies signatures over a canonicalized subset of request
//! headers, proving a request originated from the holder of an actor's
//! private key. The covered-header contract is
//! `(request-target) host date`.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rsa::signature::Verifier;
use rsa::{RsaPublicKey, pkcs1v15::Signature as Pkcs1v15Signature};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Headers every inbound signature must cover
pub const REQUIRED_HEADERS: [&str; 3] = ["(request-target)", "host", "date"];

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL of the signing key, with a `#main-key` fragment)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names, in the order they were signed
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Extract the signature parameters carried by a request, if any
///
/// Accepts both `Authorization: Signature ...` and a bare `Signature`
/// header. Returns `None` when the request is unsigned.
pub fn signature_header(headers: &http::HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(http::header::AUTHORIZATION) {
        if let Ok(value) = auth.to_str() {
            if let Some(params) = value.strip_prefix("Signature ") {
                return Some(params.to_string());
            }
        }
    }
    headers
        .get("signature")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Parse Signature header parameters
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in header.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {} // Ignore unknown fields
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or(AppError::Unauthorized)?,
        algorithm: algorithm.ok_or(AppError::Unauthorized)?,
        headers: headers.ok_or(AppError::Unauthorized)?,
        signature: signature.ok_or(AppError::Unauthorized)?,
    })
}

/// The `WWW-Authenticate` challenge advertised on verification setup
/// failure.
pub fn challenge(realm: &str) -> String {
    let mut params = Vec::new();
    if !realm.is_empty() {
        params.push(format!("realm={:?}", realm));
    }
    params.push(format!("headers={:?}", REQUIRED_HEADERS.join(" ")));
    format!("Signature {}", params.join(", "))
}

/// Reconstruct the signing base string from the covered headers, in the
/// order declared by the signature parameters.
fn build_signing_string(
    method: &str,
    path_and_query: &str,
    headers: &http::HeaderMap,
    covered: &[String],
) -> Result<String, AppError> {
    let mut parts = Vec::with_capacity(covered.len());

    for name in covered {
        let value = match name.as_str() {
            "(request-target)" => format!("{} {}", method.to_lowercase(), path_and_query),
            other => headers
                .get(other)
                .and_then(|v| v.to_str().ok())
                .ok_or(AppError::Unauthorized)?
                .to_string(),
        };
        parts.push(format!("{}: {}", name, value));
    }

    Ok(parts.join("\n"))
}

/// Verify a request's detached signature against the resolved public key
///
/// # Errors
/// `Unauthorized` on any mismatch: unsupported algorithm, a required
/// covered header missing from the declaration or the request, or a
/// signature that does not verify. The caller decides whether to degrade
/// to the anonymous identity.
pub fn verify_signature(
    method: &str,
    path_and_query: &str,
    headers: &http::HeaderMap,
    parsed: &ParsedSignature,
    public_key: &RsaPublicKey,
) -> Result<(), AppError> {
    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(AppError::Unauthorized);
    }

    for required in REQUIRED_HEADERS {
        if !parsed.headers.iter().any(|h| h == required) {
            return Err(AppError::Unauthorized);
        }
    }

    let signing_string = build_signing_string(method, path_and_query, headers, &parsed.headers)?;

    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| AppError::Unauthorized)?;
    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| AppError::Unauthorized)?;

    let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new_unprefixed(public_key.clone());
    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| AppError::Unauthorized)?;

    Ok(())
}

/// Headers to add to an outbound signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 2616)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
}

/// Sign an outbound HTTP request
///
/// # Arguments
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full URL being requested
/// * `body` - Request body (for digest)
/// * `private_key_pem` - RSA private key in PEM format
/// * `key_id` - Full URL to the public key (actor#main-key)
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
) -> Result<SignatureHeaders, AppError> {
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};

    let parsed_url = url::Url::parse(url)
        .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;
    let host = parsed_url
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;
    // Non-default ports are part of the Host header the peer will see.
    let host = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let path_and_query = match parsed_url.query() {
        Some(q) => format!("{}?{}", parsed_url.path(), q),
        None => parsed_url.path().to_string(),
    };

    let date = chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    let digest = body.map(|b| format!("SHA-256={}", BASE64.encode(Sha256::digest(b))));

    let request_target = format!("{} {}", method.to_lowercase(), path_and_query);
    let mut signing_parts = vec![
        format!("(request-target): {}", request_target),
        format!("host: {}", host),
        format!("date: {}", date),
    ];
    let mut headers_list = vec!["(request-target)", "host", "date"];
    if let Some(digest_value) = &digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }
    let signing_string = signing_parts.join("\n");

    let private_key = rsa::RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| AppError::MalformedKey(e.to_string()))?;
    let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new_unprefixed(private_key);
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
    let signature_b64 = BASE64.encode(signature.to_bytes());

    let signature_header = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_id,
        headers_list.join(" "),
        signature_b64
    );

    Ok(SignatureHeaders {
        signature: signature_header,
        date,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};

    fn generate_test_keypair() -> (String, RsaPublicKey) {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("key generation should work");
        let public_key = RsaPublicKey::from(&private_key);
        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("private key pem")
            .to_string();

        (private_key_pem, public_key)
    }

    fn build_signed_header_map(
        method: &str,
        url: &str,
        private_key_pem: &str,
    ) -> (HeaderMap, String) {
        let key_id = "https://remote.example/actors/alice#main-key";
        let signed = sign_request(method, url, None, private_key_pem, key_id).expect("signed");
        let parsed_url = url::Url::parse(url).expect("valid test url");
        let host = parsed_url.host_str().expect("host");
        let path_and_query = match parsed_url.query() {
            Some(q) => format!("{}?{}", parsed_url.path(), q),
            None => parsed_url.path().to_string(),
        };

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_str(host).expect("host header"));
        headers.insert(
            "date",
            HeaderValue::from_str(&signed.date).expect("date header"),
        );
        headers.insert(
            "signature",
            HeaderValue::from_str(&signed.signature).expect("signature header"),
        );

        (headers, path_and_query)
    }

    #[test]
    fn verify_signature_accepts_valid_signed_request() {
        let (private_key_pem, public_key) = generate_test_keypair();
        let (headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox?foo=bar", &private_key_pem);

        let parsed =
            parse_signature_header(&signature_header(&headers).expect("signature present"))
                .expect("parsed");
        let result = verify_signature("POST", &path, &headers, &parsed, &public_key);
        assert!(result.is_ok(), "valid signature should verify: {result:?}");
    }

    #[test]
    fn verify_signature_rejects_tampered_target() {
        let (private_key_pem, public_key) = generate_test_keypair();
        let (headers, _) =
            build_signed_header_map("POST", "https://remote.example/inbox", &private_key_pem);

        let parsed =
            parse_signature_header(&signature_header(&headers).expect("signature present"))
                .expect("parsed");
        let result = verify_signature("POST", "/other-inbox", &headers, &parsed, &public_key);
        assert!(matches!(result, Err(AppError::Unauthorized)));
    }

    #[test]
    fn verify_signature_rejects_when_date_not_in_signed_headers() {
        let (private_key_pem, public_key) = generate_test_keypair();
        let (headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox", &private_key_pem);

        let mut parsed =
            parse_signature_header(&signature_header(&headers).expect("signature present"))
                .expect("parsed");
        parsed.headers.retain(|h| h != "date");

        let result = verify_signature("POST", &path, &headers, &parsed, &public_key);
        assert!(matches!(result, Err(AppError::Unauthorized)));
    }

    #[test]
    fn verify_signature_rejects_missing_date_header() {
        let (private_key_pem, public_key) = generate_test_keypair();
        let (mut headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox", &private_key_pem);
        let parsed =
            parse_signature_header(&signature_header(&headers).expect("signature present"))
                .expect("parsed");
        headers.remove("date");

        let result = verify_signature("POST", &path, &headers, &parsed, &public_key);
        assert!(matches!(result, Err(AppError::Unauthorized)));
    }

    #[test]
    fn verify_signature_rejects_unsupported_algorithm() {
        let (private_key_pem, public_key) = generate_test_keypair();
        let (headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox", &private_key_pem);
        let mut parsed =
            parse_signature_header(&signature_header(&headers).expect("signature present"))
                .expect("parsed");
        parsed.algorithm = "hmac-sha256".to_string();

        let result = verify_signature("POST", &path, &headers, &parsed, &public_key);
        assert!(matches!(result, Err(AppError::Unauthorized)));
    }

    #[test]
    fn signature_header_reads_authorization_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Signature keyId=\"k\",algorithm=\"rsa-sha256\",headers=\"(request-target) host date\",signature=\"Zg==\""),
        );
        let params = signature_header(&headers).expect("params");
        let parsed = parse_signature_header(&params).expect("parsed");
        assert_eq!(parsed.key_id, "k");
        assert_eq!(parsed.headers.len(), 3);
    }

    #[test]
    fn signature_header_absent_for_unsigned_request() {
        let headers = HeaderMap::new();
        assert!(signature_header(&headers).is_none());

        let mut bearer = HeaderMap::new();
        bearer.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer some-token"),
        );
        assert!(signature_header(&bearer).is_none());
    }

    #[test]
    fn challenge_names_realm_and_required_headers() {
        assert_eq!(
            challenge("node.example.com"),
            "Signature realm=\"node.example.com\", headers=\"(request-target) host date\""
        );
    }
}
