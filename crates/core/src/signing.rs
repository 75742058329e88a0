//! Operator signing service.
//!
//! Holds the active Ed25519 operator keypair and produces the two signed
//! artifacts the platform emits:
//!
//! - **Signed command packets** — detached base64url signatures over the
//!   canonical serialization of a command payload (see [`crate::canonical`]).
//! - **Route passes** — short-lived EdDSA JWTs authorizing a mobile client
//!   to operate specific locks.
//!
//! Exactly one keypair is "hot" at a time. [`SigningService::rotate`]
//! swaps the in-memory key reference; callers must not cache signed
//! artifacts across a rotation boundary if freshness matters.

use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::canonical::canonical_bytes;
use crate::command::SignedPacket;
use crate::error::SigningError;

/// Default route-pass lifetime in hours.
const DEFAULT_ROUTE_PASS_TTL_HOURS: i64 = 24;

/// Default `iss` claim when none is configured.
const DEFAULT_ISSUER: &str = "keyway";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the signing service.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    /// base64url-encoded 32-byte Ed25519 seed. `None` means no key is
    /// configured; production contexts must treat that as fatal.
    pub operator_key_seed: Option<String>,
    /// Route-pass lifetime in hours (default: 24).
    pub route_pass_ttl_hours: i64,
    /// `iss` claim stamped into every route pass.
    pub issuer: String,
}

impl SigningConfig {
    /// Load signing configuration from environment variables.
    ///
    /// | Env Var                | Required | Default    |
    /// |------------------------|----------|------------|
    /// | `OPERATOR_SIGNING_KEY` | no*      | --         |
    /// | `ROUTE_PASS_TTL_HOURS` | no       | `24`       |
    /// | `ROUTE_PASS_ISSUER`    | no       | `"keyway"` |
    ///
    /// *Whether a missing key is fatal is decided by the caller:
    /// [`SigningService::from_config`] fails, which production composition
    /// roots must propagate, while dev/test contexts may fall back to
    /// [`SigningService::ephemeral`].
    ///
    /// # Panics
    ///
    /// Panics if `ROUTE_PASS_TTL_HOURS` is set but not a valid integer.
    pub fn from_env() -> Self {
        let operator_key_seed = std::env::var("OPERATOR_SIGNING_KEY")
            .ok()
            .filter(|s| !s.is_empty());

        let route_pass_ttl_hours: i64 = std::env::var("ROUTE_PASS_TTL_HOURS")
            .unwrap_or_else(|_| DEFAULT_ROUTE_PASS_TTL_HOURS.to_string())
            .parse()
            .expect("ROUTE_PASS_TTL_HOURS must be a valid i64");

        let issuer =
            std::env::var("ROUTE_PASS_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.to_string());

        Self {
            operator_key_seed,
            route_pass_ttl_hours,
            issuer,
        }
    }
}

// ---------------------------------------------------------------------------
// Route pass claims
// ---------------------------------------------------------------------------

/// Claims embedded in every route pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePassClaims {
    /// Issuer (operator identity).
    pub iss: String,
    /// Subject -- the authorized user.
    pub sub: String,
    /// Lock identifiers this pass may operate.
    pub aud: Vec<String>,
    /// Unique token identifier (UUID v4) for revocation / audit.
    pub jti: String,
    /// Public key of the requesting device, bound into the pass.
    pub device_pubkey: String,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// One hot keypair plus the derived forms the service hands out.
struct KeyMaterial {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    /// PKCS#8 DER of the private key, the format `jsonwebtoken` consumes.
    pkcs8_der: Vec<u8>,
    /// Truncated SHA-256 fingerprint of the public key, used as `kid`.
    key_id: String,
}

impl KeyMaterial {
    fn from_signing_key(signing_key: SigningKey) -> Result<Self, SigningError> {
        let verifying_key = signing_key.verifying_key();

        let pkcs8_der = signing_key
            .to_pkcs8_der()
            .map_err(|e| SigningError::Encoding(format!("PKCS#8 encoding failed: {e}")))?
            .as_bytes()
            .to_vec();

        let digest = Sha256::digest(verifying_key.as_bytes());
        let key_id = digest
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect::<String>();

        Ok(Self {
            signing_key,
            verifying_key,
            pkcs8_der,
            key_id,
        })
    }

    fn from_seed(seed: &[u8; 32]) -> Result<Self, SigningError> {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    fn generate() -> Result<Self, SigningError> {
        Self::from_signing_key(SigningKey::generate(&mut rand::rngs::OsRng))
    }
}

// ---------------------------------------------------------------------------
// SigningService
// ---------------------------------------------------------------------------

/// Signs command packets and route passes with the operator keypair.
///
/// Cheap to share via `Arc<SigningService>`; all methods take `&self`.
pub struct SigningService {
    keys: RwLock<Arc<KeyMaterial>>,
    issuer: String,
    route_pass_ttl_hours: i64,
}

impl SigningService {
    /// Build the service from configuration.
    ///
    /// Fails with [`SigningError::MissingKey`] when no operator key is
    /// configured -- production composition roots must propagate this.
    pub fn from_config(config: &SigningConfig) -> Result<Self, SigningError> {
        let encoded = config.operator_key_seed.as_deref().ok_or_else(|| {
            SigningError::MissingKey("OPERATOR_SIGNING_KEY is not set".to_string())
        })?;

        let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|e| {
            SigningError::Encoding(format!("OPERATOR_SIGNING_KEY is not valid base64url: {e}"))
        })?;
        let seed: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            SigningError::Encoding(format!(
                "OPERATOR_SIGNING_KEY must decode to 32 bytes, got {}",
                v.len()
            ))
        })?;

        Ok(Self {
            keys: RwLock::new(Arc::new(KeyMaterial::from_seed(&seed)?)),
            issuer: config.issuer.clone(),
            route_pass_ttl_hours: config.route_pass_ttl_hours,
        })
    }

    /// Build the service with a freshly generated throwaway keypair.
    ///
    /// For non-production and test contexts where no operator key is
    /// configured; signed artifacts are only verifiable within-process.
    pub fn ephemeral() -> Result<Self, SigningError> {
        Ok(Self {
            keys: RwLock::new(Arc::new(KeyMaterial::generate()?)),
            issuer: DEFAULT_ISSUER.to_string(),
            route_pass_ttl_hours: DEFAULT_ROUTE_PASS_TTL_HOURS,
        })
    }

    /// Replace the hot keypair with one derived from `seed`.
    ///
    /// Artifacts signed before the swap no longer verify against the new
    /// public key.
    pub fn rotate(&self, seed: &[u8; 32]) -> Result<(), SigningError> {
        let material = Arc::new(KeyMaterial::from_seed(seed)?);
        match self.keys.write() {
            Ok(mut guard) => *guard = material,
            Err(poisoned) => *poisoned.into_inner() = material,
        }
        Ok(())
    }

    /// Snapshot the current key material.
    fn keys(&self) -> Arc<KeyMaterial> {
        match self.keys.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Fingerprint of the hot public key (the `kid` header value).
    pub fn key_id(&self) -> String {
        self.keys().key_id.clone()
    }

    /// base64url of the hot public key, for distribution to gateways.
    pub fn public_key(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.keys().verifying_key.as_bytes())
    }

    /// Route-pass lifetime in hours.
    pub fn route_pass_ttl_hours(&self) -> i64 {
        self.route_pass_ttl_hours
    }

    // -- Command packets ----------------------------------------------------

    /// Sign a command payload, returning the payload plus its detached
    /// base64url Ed25519 signature.
    ///
    /// The signature covers the canonical (sorted-key) serialization, so
    /// structurally identical payloads always produce identical signatures
    /// under the same key.
    pub fn sign_command(&self, payload: Value) -> Result<SignedPacket, SigningError> {
        let bytes = canonical_bytes(&payload)?;
        let signature = self.keys().signing_key.sign(&bytes);

        Ok(SignedPacket {
            payload,
            signature: URL_SAFE_NO_PAD.encode(signature.to_bytes()),
        })
    }

    /// Verify a signed command packet against the hot public key.
    pub fn verify_command(&self, packet: &SignedPacket) -> Result<(), SigningError> {
        let raw = URL_SAFE_NO_PAD
            .decode(&packet.signature)
            .map_err(|_| SigningError::InvalidSignature)?;
        let raw: [u8; 64] = raw.try_into().map_err(|_| SigningError::InvalidSignature)?;
        let signature = Signature::from_bytes(&raw);

        let bytes = canonical_bytes(&packet.payload)?;
        self.keys()
            .verifying_key
            .verify(&bytes, &signature)
            .map_err(|_| SigningError::InvalidSignature)
    }

    // -- Route passes -------------------------------------------------------

    /// Issue a route pass authorizing `sub` to operate the locks in `aud`.
    ///
    /// Injects `iss`, `jti`, `iat`, and `exp = iat + TTL`; the header
    /// carries `alg: EdDSA` and the hot key's `kid`.
    pub fn sign_route_pass(
        &self,
        sub: &str,
        aud: Vec<String>,
        device_pubkey: &str,
    ) -> Result<String, SigningError> {
        let keys = self.keys();
        let now = chrono::Utc::now().timestamp();

        let claims = RoutePassClaims {
            iss: self.issuer.clone(),
            sub: sub.to_string(),
            aud,
            jti: Uuid::new_v4().to_string(),
            device_pubkey: device_pubkey.to_string(),
            iat: now,
            exp: now + self.route_pass_ttl_hours * 3600,
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(keys.key_id.clone());

        encode(
            &header,
            &claims,
            &EncodingKey::from_ed_der(&keys.pkcs8_der),
        )
        .map_err(|e| SigningError::Encoding(e.to_string()))
    }

    /// Validate a route pass and return its claims.
    ///
    /// Fails with [`SigningError::Expired`] when `exp` has passed and
    /// [`SigningError::InvalidSignature`] for every other validation failure.
    pub fn verify_route_pass(&self, token: &str) -> Result<RoutePassClaims, SigningError> {
        let keys = self.keys();

        let mut validation = Validation::new(Algorithm::EdDSA);
        // `aud` holds lock identifiers, not a service audience.
        validation.validate_aud = false;

        let decoding_key = DecodingKey::from_ed_der(keys.verifying_key.as_bytes());

        match decode::<RoutePassClaims>(token, &decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(SigningError::Expired),
                _ => Err(SigningError::InvalidSignature),
            },
        }
    }
}
