use std::fmt;

use anyhow::{Context, Result, bail};
use subtle::ConstantTimeEq;

pub const IDENTIFIER_LEN: usize = 16;

/// The shared secret every handshake header must carry.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Identifier([u8; IDENTIFIER_LEN]);

impl Identifier {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; IDENTIFIER_LEN]) -> Self {
        Self(bytes)
    }

    /// Parses a UUID-style hex string. Hyphens are ignored.
    pub fn parse(input: &str) -> Result<Self> {
        let stripped: String = input.chars().filter(|c| *c != '-').collect();
        let decoded = hex::decode(stripped.trim())
            .with_context(|| format!("Identifier is not valid hex: {input}"))?;
        let Ok(bytes) = <[u8; IDENTIFIER_LEN]>::try_from(decoded.as_slice()) else {
            bail!(
                "Identifier must be {IDENTIFIER_LEN} bytes, got {}",
                decoded.len()
            );
        };
        Ok(Self(bytes))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; IDENTIFIER_LEN] {
        &self.0
    }

    /// Compares `candidate` against this identifier in constant time.
    /// Anything that is not exactly 16 bytes is rejected.
    #[must_use]
    pub fn matches(&self, candidate: &[u8]) -> bool {
        candidate.len() == IDENTIFIER_LEN && bool::from(self.0.as_slice().ct_eq(candidate))
    }
}

// Keep the secret out of logs.
impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Identifier(..)")
    }
}
