//! DPoP proof validation (RFC 9449) for the token endpoint.
//!
//! A verified proof binds the issued access token to the proof key: its
//! RFC 7638 thumbprint becomes the token's `cnf.jkt`. Replay tracking of
//! `jti` is left to the caller.

use axum::http::{HeaderMap, Method, Uri, header};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::warn;

pub const DPOP_HEADER: &str = "DPoP";

#[derive(Debug, Clone, Copy)]
pub struct DpopPolicy {
    // Allowed iat drift (clock skew), seconds.
    pub iat_leeway_seconds: i64,
    // Maximum acceptable age of the proof (now - iat), seconds.
    pub max_age_seconds: i64,
}

/// A proof that passed every check.
#[derive(Debug, Clone)]
pub struct VerifiedDpop {
    pub jti: String,
    pub iat: i64,
    /// Thumbprint of the proof key.
    pub jkt: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DpopError {
    #[error("invalid DPoP proof jwt")]
    InvalidJwt,
    #[error("missing jwk in DPoP header")]
    MissingJwk,
    #[error("unsupported DPoP alg: {0:?}")]
    UnsupportedAlg(Algorithm),
    #[error("invalid DPoP typ")]
    InvalidTyp,
    #[error("missing required claim: {0}")]
    MissingClaim(&'static str),
    #[error("htm mismatch")]
    MethodMismatch,
    #[error("htu mismatch")]
    UriMismatch,
    #[error("iat out of range")]
    InvalidIat,
    #[error("unsupported jwk for DPoP")]
    UnsupportedJwk,
}

#[derive(Debug, Deserialize)]
struct DpopClaims {
    htm: Option<String>,
    htu: Option<String>,
    iat: Option<i64>,
    jti: Option<String>,
}

/// Verify the `DPoP` header of a request, if there is one.
///
/// `Ok(None)` means the client did not send a proof.
pub fn verify_proof(
    policy: DpopPolicy,
    headers: &HeaderMap,
    method: &Method,
    uri: &Uri,
    public_base_url: Option<&str>,
    now: i64,
) -> Result<Option<VerifiedDpop>, DpopError> {
    let Some(proof) = headers.get(DPOP_HEADER) else {
        return Ok(None);
    };
    let proof = proof.to_str().map_err(|e| {
        warn!(error = ?e, "invalid DPoP header encoding");
        DpopError::InvalidJwt
    })?;

    let header = jsonwebtoken::decode_header(proof).map_err(|e| {
        warn!(error = ?e, "invalid DPoP header");
        DpopError::InvalidJwt
    })?;

    match header.typ.as_deref() {
        Some(typ) if typ.eq_ignore_ascii_case("dpop+jwt") => {}
        _ => return Err(DpopError::InvalidTyp),
    }

    // Proofs must be EdDSA.
    if header.alg != Algorithm::EdDSA {
        return Err(DpopError::UnsupportedAlg(header.alg));
    }

    let jwk: Jwk = header.jwk.ok_or(DpopError::MissingJwk)?;
    let jkt = compute_jwk_thumbprint(&jwk)?;
    let decoding_key = DecodingKey::from_jwk(&jwk).map_err(|e| {
        warn!(error = ?e, "invalid DPoP jwk");
        DpopError::InvalidJwt
    })?;

    // A proof has no exp, iss or aud; freshness comes from iat.
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let token_data = decode::<DpopClaims>(proof, &decoding_key, &validation).map_err(|e| {
        warn!(error = ?e, "invalid DPoP proof signature");
        DpopError::InvalidJwt
    })?;
    let claims = token_data.claims;

    let htm = claims.htm.ok_or(DpopError::MissingClaim("htm"))?;
    let htu = claims.htu.ok_or(DpopError::MissingClaim("htu"))?;
    let iat = claims.iat.ok_or(DpopError::MissingClaim("iat"))?;
    let jti = claims.jti.ok_or(DpopError::MissingClaim("jti"))?;

    if !htm.eq_ignore_ascii_case(method.as_str()) {
        return Err(DpopError::MethodMismatch);
    }

    let expected_htu = build_expected_htu(headers, uri, public_base_url);
    if normalize_htu(&htu) != normalize_htu(&expected_htu) {
        return Err(DpopError::UriMismatch);
    }

    let leeway = policy.iat_leeway_seconds;
    if iat > now + leeway || now - iat > policy.max_age_seconds + leeway {
        return Err(DpopError::InvalidIat);
    }

    Ok(Some(VerifiedDpop { jti, iat, jkt }))
}

fn build_expected_htu(headers: &HeaderMap, uri: &Uri, public_base_url: Option<&str>) -> String {
    if let Some(base) = public_base_url {
        if let Ok(url) = build_htu_from_base(base, uri) {
            return url;
        }
        warn!("PUBLIC_BASE_URL is not a valid URL; using forwarded headers");
    }
    build_htu_from_forwarded(headers, uri)
}

fn build_htu_from_base(base: &str, uri: &Uri) -> Result<String, url::ParseError> {
    let mut url = url::Url::parse(base)?;
    url.set_path(uri.path());
    // htu excludes query and fragment (RFC 9449 section 4.2)
    url.set_query(None);
    Ok(url.to_string())
}

fn build_htu_from_forwarded(headers: &HeaderMap, uri: &Uri) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");

    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");

    format!("{}://{}{}", scheme, host, uri.path())
}

/// Lowercase scheme and host, drop default ports, query and fragment.
fn normalize_htu(htu: &str) -> String {
    let Ok(url) = url::Url::parse(htu) else {
        return htu.to_string();
    };
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    let port = url
        .port()
        .filter(|p| !((scheme == "http" && *p == 80) || (scheme == "https" && *p == 443)));
    match port {
        Some(port) => format!("{}://{}:{}{}", scheme, host, port, url.path()),
        None => format!("{}://{}{}", scheme, host, url.path()),
    }
}

/// RFC 7638 thumbprint of an Ed25519 JWK.
pub fn compute_jwk_thumbprint(jwk: &Jwk) -> Result<String, DpopError> {
    let x = match &jwk.algorithm {
        AlgorithmParameters::OctetKeyPair(params) => match params.curve {
            EllipticCurve::Ed25519 => params.x.clone(),
            _ => return Err(DpopError::UnsupportedJwk),
        },
        _ => return Err(DpopError::UnsupportedJwk),
    };

    // Canonical JSON, members in lexicographic order: crv, kty, x
    let canonical = format!("{{\"crv\":\"Ed25519\",\"kty\":\"OKP\",\"x\":\"{}\"}}", x);
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
}
