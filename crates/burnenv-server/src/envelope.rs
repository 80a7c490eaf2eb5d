//! Client-side envelope codec.
//!
//! A password and a plaintext become a self-describing [`Envelope`]: the
//! AES-256-GCM ciphertext plus everything needed to re-derive the key
//! (salt, nonce, Argon2id parameters). The server stores envelopes as opaque
//! blobs and never calls [`open`].

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// The only KDF this codec derives keys with.
pub const KDF_ARGON2ID: &str = "argon2id";

// Upper bounds on envelope-supplied KDF cost. An envelope is untrusted input
// on the opening side; these keep a hostile one from pinning the CPU or
// allocating gigabytes.
const MAX_TIME_COST: u32 = 16;
const MAX_MEMORY_KIB: u32 = 1024 * 1024;
const MAX_THREADS: u8 = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("plaintext cannot be empty")]
    EmptyPlaintext,
    #[error("password cannot be empty")]
    EmptyPassword,
    #[error("invalid salt length: expected 16 bytes, got {0}")]
    InvalidSalt(usize),
    #[error("invalid iv length: expected 12 bytes, got {0}")]
    InvalidNonce(usize),
    #[error("unsupported kdf algorithm: {0}")]
    UnsupportedKdf(String),
    #[error("invalid kdf parameters: {0}")]
    InvalidKdf(String),
    #[error("invalid payload: {0}")]
    Malformed(String),
    #[error("encryption failed")]
    Encrypt,
    /// Wrong password, flipped ciphertext bit and tag mismatch all land here.
    #[error("decryption failed: wrong password or corrupted data")]
    AuthFailure,
}

/// Key derivation parameters, carried inside every envelope so a later
/// `open` reproduces the exact key even after the defaults move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    /// Argon2 iterations.
    pub time: u32,
    /// Argon2 memory in KiB.
    pub memory: u32,
    /// Argon2 lanes.
    pub threads: u8,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: KDF_ARGON2ID.to_owned(),
            time: 3,
            memory: 64 * 1024, // 64 MiB
            threads: 4,
        }
    }
}

impl KdfParams {
    fn validate(&self) -> Result<(), EnvelopeError> {
        if self.algorithm != KDF_ARGON2ID {
            return Err(EnvelopeError::UnsupportedKdf(self.algorithm.clone()));
        }
        if !(1..=MAX_TIME_COST).contains(&self.time) {
            return Err(EnvelopeError::InvalidKdf(format!(
                "time must be in range 1..={MAX_TIME_COST}"
            )));
        }
        if !(1..=MAX_THREADS).contains(&self.threads) {
            return Err(EnvelopeError::InvalidKdf(format!(
                "threads must be in range 1..={MAX_THREADS}"
            )));
        }
        let min_memory = 8 * u32::from(self.threads);
        if !(min_memory..=MAX_MEMORY_KIB).contains(&self.memory) {
            return Err(EnvelopeError::InvalidKdf(format!(
                "memory must be in range {min_memory}..={MAX_MEMORY_KIB} KiB"
            )));
        }
        Ok(())
    }

    /// Derive the 256-bit AES key for `password` and `salt`.
    fn derive_key(&self, password: &str, salt: &[u8]) -> Result<DerivedKey, EnvelopeError> {
        self.validate()?;

        let params = Params::new(
            self.memory,
            self.time,
            u32::from(self.threads),
            Some(KEY_LEN),
        )
        .map_err(|e| EnvelopeError::InvalidKdf(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = DerivedKey([0u8; KEY_LEN]);
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut key.0)
            .map_err(|e| EnvelopeError::InvalidKdf(e.to_string()))?;
        Ok(key)
    }
}

#[derive(ZeroizeOnDrop)]
struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

/// Wire and storage form of one encrypted secret.
///
/// `expiry` and `max_views` are lifecycle policy, not key material: [`seal`]
/// leaves them zeroed and the caller fills them in before upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(rename = "iv", with = "b64")]
    pub nonce: Vec<u8>,
    pub kdf: KdfParams,
    /// Unix seconds after which the secret is gone.
    pub expiry: i64,
    pub max_views: u32,
}

impl Envelope {
    pub fn with_lifecycle(mut self, expiry: i64, max_views: u32) -> Self {
        self.expiry = expiry;
        self.max_views = max_views;
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        if envelope.ciphertext.is_empty() || envelope.salt.is_empty() || envelope.nonce.is_empty()
        {
            return Err(EnvelopeError::Malformed(
                "incomplete payload: missing required fields".into(),
            ));
        }
        Ok(envelope)
    }
}

/// Encrypt `plaintext` under `password` with the default KDF parameters.
pub fn seal(plaintext: &[u8], password: &str) -> Result<Envelope, EnvelopeError> {
    seal_with_params(plaintext, password, KdfParams::default())
}

/// Encrypt `plaintext` under `password`, deriving the key with `kdf`.
///
/// Salt and nonce come fresh from the OS RNG on every call.
pub fn seal_with_params(
    plaintext: &[u8],
    password: &str,
    kdf: KdfParams,
) -> Result<Envelope, EnvelopeError> {
    if plaintext.is_empty() {
        return Err(EnvelopeError::EmptyPlaintext);
    }
    if password.is_empty() {
        return Err(EnvelopeError::EmptyPassword);
    }

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let key = kdf.derive_key(password, &salt)?;
    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| EnvelopeError::Encrypt)?;

    Ok(Envelope {
        ciphertext,
        salt: salt.to_vec(),
        nonce: nonce.to_vec(),
        kdf,
        expiry: 0,
        max_views: 0,
    })
}

/// Decrypt `envelope` with `password`, using the KDF parameters recorded in
/// the envelope rather than the current defaults.
pub fn open(envelope: &Envelope, password: &str) -> Result<Vec<u8>, EnvelopeError> {
    if password.is_empty() {
        return Err(EnvelopeError::EmptyPassword);
    }
    if envelope.salt.len() != SALT_LEN {
        return Err(EnvelopeError::InvalidSalt(envelope.salt.len()));
    }
    if envelope.nonce.len() != NONCE_LEN {
        return Err(EnvelopeError::InvalidNonce(envelope.nonce.len()));
    }

    let key = envelope.kdf.derive_key(password, &envelope.salt)?;
    key.cipher()
        .decrypt(
            Nonce::from_slice(&envelope.nonce),
            envelope.ciphertext.as_slice(),
        )
        .map_err(|_| EnvelopeError::AuthFailure)
}

/// Standard padded base64 for the binary envelope fields.
mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams {
            time: 1,
            memory: 1024,
            threads: 1,
            ..KdfParams::default()
        }
    }

    fn seal_fast(plaintext: &[u8], password: &str) -> Envelope {
        seal_with_params(plaintext, password, fast()).unwrap()
    }

    #[test]
    fn round_trip_with_default_params() {
        let env = seal(b"DATABASE_URL=postgres://prod", "hunter2").unwrap();
        assert_eq!(env.kdf, KdfParams::default());
        assert_eq!(env.salt.len(), SALT_LEN);
        assert_eq!(env.nonce.len(), NONCE_LEN);
        assert_eq!(open(&env, "hunter2").unwrap(), b"DATABASE_URL=postgres://prod");
    }

    #[test]
    fn round_trip_binary_plaintext() {
        let plaintext: Vec<u8> = (0..=255u8).collect();
        let env = seal_fast(&plaintext, "pw");
        assert_eq!(open(&env, "pw").unwrap(), plaintext);
    }

    #[test]
    fn open_uses_params_from_envelope() {
        // Sealed with non-default params; open must not fall back to defaults.
        let env = seal_fast(b"s3cret", "pw");
        assert_ne!(env.kdf, KdfParams::default());
        assert_eq!(open(&env, "pw").unwrap(), b"s3cret");
    }

    #[test]
    fn wrong_password_always_fails() {
        let env = seal_fast(b"s3cret", "right");
        for _ in 0..3 {
            assert_eq!(open(&env, "wrong"), Err(EnvelopeError::AuthFailure));
        }
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let env = seal_fast(b"s3cret value", "pw");
        for idx in [0, env.ciphertext.len() / 2, env.ciphertext.len() - 1] {
            let mut bad = env.clone();
            bad.ciphertext[idx] ^= 0x01;
            assert_eq!(open(&bad, "pw"), Err(EnvelopeError::AuthFailure));
        }
    }

    #[test]
    fn tampered_salt_fails() {
        let mut env = seal_fast(b"s3cret", "pw");
        env.salt[SALT_LEN - 1] ^= 0x80;
        assert_eq!(open(&env, "pw"), Err(EnvelopeError::AuthFailure));
    }

    #[test]
    fn tampered_nonce_fails() {
        let mut env = seal_fast(b"s3cret", "pw");
        env.nonce[0] ^= 0x01;
        assert_eq!(open(&env, "pw"), Err(EnvelopeError::AuthFailure));
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let mut env = seal_fast(b"s3cret", "pw");
        env.ciphertext.truncate(4);
        assert_eq!(open(&env, "pw"), Err(EnvelopeError::AuthFailure));
    }

    #[test]
    fn salt_and_nonce_are_fresh_per_seal() {
        let a = seal_fast(b"same", "same");
        let b = seal_fast(b"same", "same");
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn seal_rejects_empty_inputs() {
        assert_eq!(
            seal_with_params(b"", "pw", fast()),
            Err(EnvelopeError::EmptyPlaintext)
        );
        assert_eq!(
            seal_with_params(b"x", "", fast()),
            Err(EnvelopeError::EmptyPassword)
        );
    }

    #[test]
    fn open_rejects_structural_damage() {
        let env = seal_fast(b"s3cret", "pw");
        assert_eq!(open(&env, ""), Err(EnvelopeError::EmptyPassword));

        let mut short_salt = env.clone();
        short_salt.salt.pop();
        assert_eq!(open(&short_salt, "pw"), Err(EnvelopeError::InvalidSalt(15)));

        let mut long_nonce = env;
        long_nonce.nonce.push(0);
        assert_eq!(open(&long_nonce, "pw"), Err(EnvelopeError::InvalidNonce(13)));
    }

    #[test]
    fn open_rejects_unknown_or_hostile_kdf() {
        let env = seal_fast(b"s3cret", "pw");

        let mut scrypt = env.clone();
        scrypt.kdf.algorithm = "scrypt".into();
        assert_eq!(
            open(&scrypt, "pw"),
            Err(EnvelopeError::UnsupportedKdf("scrypt".into()))
        );

        let mut huge = env;
        huge.kdf.memory = u32::MAX;
        assert!(matches!(open(&huge, "pw"), Err(EnvelopeError::InvalidKdf(_))));
    }

    #[test]
    fn wire_format_field_names() {
        let env = seal_fast(b"s3cret", "pw").with_lifecycle(1_700_000_000, 3);
        let value: serde_json::Value = serde_json::from_slice(&env.to_json().unwrap()).unwrap();

        for key in ["ciphertext", "salt", "iv", "kdf", "expiry", "max_views"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value.get("nonce").is_none());
        assert_eq!(value["kdf"]["algorithm"], "argon2id");
        assert_eq!(value["kdf"]["time"], 1);
        assert_eq!(value["kdf"]["memory"], 1024);
        assert_eq!(value["kdf"]["threads"], 1);
        assert_eq!(value["expiry"], 1_700_000_000i64);
        assert_eq!(value["max_views"], 3);
        // 16 bytes -> 24 chars of padded base64.
        assert_eq!(value["salt"].as_str().unwrap().len(), 24);
    }

    #[test]
    fn json_survives_transport_and_opens() {
        let env = seal_fast(b"API_KEY=abc", "pw").with_lifecycle(42, 1);
        let decoded = Envelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(open(&decoded, "pw").unwrap(), b"API_KEY=abc");
    }

    #[test]
    fn from_json_accepts_independently_built_payload() {
        let raw = br#"{
            "ciphertext": "AAECAwQFBgcICQoLDA0ODxAREhM=",
            "salt": "AAAAAAAAAAAAAAAAAAAAAA==",
            "iv": "AAAAAAAAAAAAAAAA",
            "kdf": {"algorithm": "argon2id", "time": 3, "memory": 65536, "threads": 4},
            "expiry": 1700000000,
            "max_views": 1
        }"#;
        let env = Envelope::from_json(raw).unwrap();
        assert_eq!(env.salt, vec![0u8; 16]);
        assert_eq!(env.nonce, vec![0u8; 12]);
        assert_eq!(env.ciphertext.len(), 20);
        assert_eq!(env.kdf, KdfParams::default());
    }

    #[test]
    fn from_json_rejects_incomplete_or_garbage() {
        let empty_ct = br#"{"ciphertext":"","salt":"AA==","iv":"AA==",
            "kdf":{"algorithm":"argon2id","time":3,"memory":65536,"threads":4},
            "expiry":1,"max_views":1}"#;
        assert!(matches!(
            Envelope::from_json(empty_ct),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::from_json(br#"{"ciphertext":"!!notbase64!!"}"#),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::from_json(b"not json"),
            Err(EnvelopeError::Malformed(_))
        ));
    }
}
