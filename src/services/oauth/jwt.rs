//! Signed (and optionally encrypted) JWTs for access tokens.
use josekit::jwe::{self, Dir, JweHeader};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, warn};

/// `dir` + `A256GCM` needs a 256-bit key.
const CONTENT_ENCRYPTION_KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("jwt signing failed: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    #[error("jwt verification failed: {0}")]
    Verify(#[from] jsonwebtoken::errors::Error),

    #[error("jwe processing failed: {0}")]
    Jwe(#[from] josekit::JoseError),

    #[error("missing or empty '{0}' claim")]
    MissingClaim(&'static str),

    #[error("claims are not valid JSON: {0}")]
    Claims(#[from] serde_json::Error),
}

/// Registered claims checked on every verified token, plus the rest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JwtClaims {
    pub iss: String,
    #[serde(default)]
    pub aud: Value,
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JwtClaims {
    pub fn audiences(&self) -> Vec<String> {
        match &self.aud {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn aud_is_present_and_valid(aud: &Value) -> bool {
    match aud {
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(arr) => arr
            .iter()
            .any(|v| v.as_str().is_some_and(|s| !s.trim().is_empty())),
        _ => false,
    }
}

/// Signs with EdDSA or HS256; wraps in a `dir`/`A256GCM` JWE when an
/// encryption key is configured.
#[derive(Clone)]
pub struct JwtCodec {
    issuer: String,
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    encryption_key: Option<Vec<u8>>,
    leeway_seconds: u64,
}

impl std::fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("JwtCodec")
            .field("issuer", &self.issuer)
            .field("algorithm", &self.algorithm)
            .field("encrypted", &self.encryption_key.is_some())
            .finish()
    }
}

impl JwtCodec {
    /// `private_key_pem` must be an Ed25519 key in PKCS#8 PEM format.
    pub fn from_ed_pem(
        issuer: impl Into<String>,
        private_key_pem: &str,
        public_key_pem: &str,
    ) -> Result<Self, JwtError> {
        let encoding_key = EncodingKey::from_ed_pem(private_key_pem.as_bytes()).map_err(|e| {
            warn!(error = %e, "failed to parse JWT private key PEM (expected Ed25519 PKCS#8 PEM)");
            JwtError::InvalidKey("ed25519 private key".to_string())
        })?;
        let decoding_key = DecodingKey::from_ed_pem(public_key_pem.as_bytes()).map_err(|e| {
            warn!(error = %e, "failed to parse JWT public key PEM");
            JwtError::InvalidKey("ed25519 public key".to_string())
        })?;
        Ok(Self {
            issuer: issuer.into(),
            algorithm: Algorithm::EdDSA,
            encoding_key,
            decoding_key,
            encryption_key: None,
            leeway_seconds: 60,
        })
    }

    pub fn from_secret(issuer: impl Into<String>, secret: &[u8]) -> Result<Self, JwtError> {
        if secret.len() < 32 {
            return Err(JwtError::InvalidKey("HS256 secret shorter than 32 bytes".to_string()));
        }
        Ok(Self {
            issuer: issuer.into(),
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            encryption_key: None,
            leeway_seconds: 60,
        })
    }

    pub fn with_encryption_key(mut self, key: Vec<u8>) -> Result<Self, JwtError> {
        if key.len() != CONTENT_ENCRYPTION_KEY_LEN {
            return Err(JwtError::InvalidKey(format!(
                "encryption key must be {CONTENT_ENCRYPTION_KEY_LEN} bytes"
            )));
        }
        self.encryption_key = Some(key);
        Ok(self)
    }

    pub fn with_leeway(mut self, leeway_seconds: u64) -> Self {
        self.leeway_seconds = leeway_seconds;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let mut header = Header::new(self.algorithm);
        header.typ = Some("JWT".to_string());
        let signed = jsonwebtoken::encode(&header, claims, &self.encoding_key).map_err(|e| {
            error!(error = %e, "failed to sign JWT");
            JwtError::Sign(e)
        })?;

        let Some(key) = &self.encryption_key else {
            return Ok(signed);
        };
        let mut jwe_header = JweHeader::new();
        jwe_header.set_content_encryption("A256GCM");
        jwe_header.set_content_type("JWT");
        let encrypter = Dir.encrypter_from_bytes(key)?;
        Ok(jwe::serialize_compact(signed.as_bytes(), &jwe_header, &encrypter)?)
    }

    fn unwrap_encryption(&self, token: &str) -> Result<String, JwtError> {
        // A compact JWE has five segments, a JWS three.
        if token.split('.').count() != 5 {
            return Ok(token.to_string());
        }
        let Some(key) = &self.encryption_key else {
            return Err(JwtError::InvalidKey("encrypted token but no decryption key".to_string()));
        };
        let decrypter = Dir.decrypter_from_bytes(key)?;
        let (payload, _) = jwe::deserialize_compact(token, &decrypter)?;
        String::from_utf8(payload).map_err(|_| JwtError::MissingClaim("payload"))
    }

    /// Verify signature, issuer and time claims, and require non-empty
    /// `iss`, `aud`, `sub`, `exp`, `iat` and `nbf`.
    pub fn verify_strict(&self, token: &str) -> Result<JwtClaims, JwtError> {
        let token = self.unwrap_encryption(token)?;

        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["iss", "aud", "sub", "exp", "nbf"]);
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.leeway = self.leeway_seconds;

        let claims = jsonwebtoken::decode::<JwtClaims>(&token, &self.decoding_key, &validation)?.claims;

        if claims.iss.trim().is_empty() {
            return Err(JwtError::MissingClaim("iss"));
        }
        if claims.sub.trim().is_empty() {
            return Err(JwtError::MissingClaim("sub"));
        }
        if claims.exp <= 0 {
            return Err(JwtError::MissingClaim("exp"));
        }
        if claims.iat.is_none_or(|iat| iat <= 0) {
            return Err(JwtError::MissingClaim("iat"));
        }
        if claims.nbf.is_none() {
            return Err(JwtError::MissingClaim("nbf"));
        }
        if !aud_is_present_and_valid(&claims.aud) {
            return Err(JwtError::MissingClaim("aud"));
        }
        Ok(claims)
    }
}
