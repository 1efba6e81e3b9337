//! Connection codes and peer identity.
//!
//! A connection address is a fixed namespace prefix followed by a short code
//! that a person can read off one screen and type into another.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Characters random codes are drawn from.
pub const DEFAULT_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Length of a random code.
pub const DEFAULT_CODE_LENGTH: usize = 5;

/// Prepended to every code so addresses never clash with ids the transport
/// hands out on its own.
pub const ADDRESS_PREFIX: &str = "smartpad-gp7q-";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("connection code is empty")]
    Empty,

    #[error("connection code contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("code alphabet is empty")]
    EmptyAlphabet,

    #[error("code length must be at least 1")]
    ZeroLength,
}

/// The human-enterable part of a connection address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionCode(String);

impl ConnectionCode {
    /// Parse user input. Surrounding whitespace is ignored; the rest must be
    /// ASCII alphanumeric.
    pub fn parse(input: &str) -> Result<Self, CodeError> {
        let code = input.trim();
        if code.is_empty() {
            return Err(CodeError::Empty);
        }
        if let Some(c) = code.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(CodeError::InvalidCharacter(c));
        }
        Ok(Self(code.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full transport address under the given namespace prefix.
    #[must_use]
    pub fn address(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }
}

impl std::fmt::Display for ConnectionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ConnectionCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Generates random fixed-length codes from an alphabet.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    alphabet: Vec<char>,
    length: usize,
}

impl CodeGenerator {
    pub fn new(alphabet: &str, length: usize) -> Result<Self, CodeError> {
        let alphabet: Vec<char> = alphabet.chars().collect();
        if alphabet.is_empty() {
            return Err(CodeError::EmptyAlphabet);
        }
        if let Some(&c) = alphabet.iter().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(CodeError::InvalidCharacter(c));
        }
        if length == 0 {
            return Err(CodeError::ZeroLength);
        }
        Ok(Self { alphabet, length })
    }

    /// Draw a new code.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> ConnectionCode {
        let code = (0..self.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect();
        ConnectionCode(code)
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.chars().collect(),
            length: DEFAULT_CODE_LENGTH,
        }
    }
}

/// Identifies a connected client. This is the peer id the channel reports
/// for the remote end, so it stays stable for the life of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    #[must_use]
    pub fn new(peer: impl Into<String>) -> Self {
        Self(peer.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn parse_trims_and_validates() {
        assert_eq!(ConnectionCode::parse("  ABCDE ").unwrap().as_str(), "ABCDE");
        assert_eq!(ConnectionCode::parse(""), Err(CodeError::Empty));
        assert_eq!(
            ConnectionCode::parse("AB-DE"),
            Err(CodeError::InvalidCharacter('-'))
        );
    }

    #[test]
    fn address_concatenates_prefix() {
        let code: ConnectionCode = "QWERT".parse().unwrap();
        assert_eq!(code.address("ns-"), "ns-QWERT");
        assert_eq!(code.to_string(), "QWERT");
    }

    #[test]
    fn default_generator_uses_uppercase_letters() {
        let mut rng = StdRng::seed_from_u64(7);
        let generator = CodeGenerator::default();
        for _ in 0..50 {
            let code = generator.generate(&mut rng);
            assert_eq!(code.as_str().len(), DEFAULT_CODE_LENGTH);
            assert!(code.as_str().chars().all(|c| c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn custom_generator() {
        let mut rng = StdRng::seed_from_u64(1);
        let generator = CodeGenerator::new("01", 8).unwrap();
        let code = generator.generate(&mut rng);
        assert_eq!(code.as_str().len(), 8);
        assert!(code.as_str().chars().all(|c| c == '0' || c == '1'));
    }

    #[test]
    fn generator_rejects_bad_config() {
        assert_eq!(CodeGenerator::new("", 5).unwrap_err(), CodeError::EmptyAlphabet);
        assert_eq!(CodeGenerator::new("AB", 0).unwrap_err(), CodeError::ZeroLength);
        assert_eq!(
            CodeGenerator::new("A B", 3).unwrap_err(),
            CodeError::InvalidCharacter(' ')
        );
    }
}
