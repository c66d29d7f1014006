//! Agent credentials.
//!
//! A credential is a 256-bit random secret rendered as 64 lower-case hex
//! characters. It is handed to the agent exactly once at registration and is
//! afterwards only ever compared, never displayed.

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

/// Number of random bytes in a credential.
pub const CREDENTIAL_BYTES: usize = 32;

/// Length of the hex-encoded credential.
pub const CREDENTIAL_HEX_LEN: usize = CREDENTIAL_BYTES * 2;

/// Error for input that cannot possibly be a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("credential must be {CREDENTIAL_HEX_LEN} hex characters")]
pub struct MalformedCredential;

/// Type-safe agent credential that prevents accidental logging.
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    /// Generate a fresh credential from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CREDENTIAL_BYTES];
        rand::fill(&mut bytes);
        Self(SecretString::new(hex::encode(bytes).into()))
    }

    /// Validate the shape of presented input and normalize it.
    ///
    /// This is the cheap rejection step that runs before any directory
    /// lookup: it checks length and alphabet only.
    pub fn parse(input: &str) -> Result<Self, MalformedCredential> {
        let trimmed = input.trim();
        if trimmed.len() != CREDENTIAL_HEX_LEN
            || !trimmed.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(MalformedCredential);
        }
        Ok(Self(SecretString::new(trimmed.to_ascii_lowercase().into())))
    }

    /// Expose the secret value (directory lookups and the one-time
    /// registration response only).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Constant-time equality against another credential.
    pub fn verify(&self, presented: &Credential) -> bool {
        let ours = self.0.expose_secret().as_bytes();
        let theirs = presented.0.expose_secret().as_bytes();
        ours.ct_eq(theirs).into()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential([REDACTED])")
    }
}
