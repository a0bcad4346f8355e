use num_bigint::{BigInt, Sign};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

pub const NONCE_BYTES: usize = 16;
pub const TOKEN_BYTES: usize = 32;

/// Election identifier hashed into every token. Issuance and verification
/// must agree on it byte for byte.
pub const ELECTION_ID: &str = "AUA_policy_change_vote_2025";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InputError {
    #[error("wrong length: expected {expected} hex characters, found {found}")]
    WrongLength { expected: usize, found: usize },
    #[error("invalid hexadecimal: {0}")]
    InvalidHex(String),
    #[error("empty field")]
    Empty,
    #[error("vote must be \"0\" or \"1\", got {0:?}")]
    InvalidVote(String),
    #[error("token hash does not match SHA-256(election id || nonce)")]
    TokenMismatch,
    #[error("value out of range for the modulus")]
    OutOfRange,
    #[error("random number generation failed")]
    RandomNumberGeneration,
}

/// `SHA-256(election_id || nonce)` together with the nonce it came from.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    nonce: [u8; NONCE_BYTES],
    hash: [u8; TOKEN_BYTES],
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.hex())
    }
}

impl Token {
    pub fn generate(election_id: &str) -> Result<Self, InputError> {
        Self::generate_with_rng(election_id, &mut OsRng)
    }

    pub fn generate_with_rng(election_id: &str, rng: &mut impl RngCore) -> Result<Self, InputError> {
        let mut nonce = [0u8; NONCE_BYTES];
        rng.try_fill_bytes(&mut nonce)
            .map_err(|_| InputError::RandomNumberGeneration)?;
        Ok(Self::from_nonce(election_id, nonce))
    }

    pub fn from_nonce(election_id: &str, nonce: [u8; NONCE_BYTES]) -> Self {
        let hash = token_hash(election_id, &nonce);
        Token { nonce, hash }
    }

    pub fn nonce(&self) -> &[u8; NONCE_BYTES] {
        &self.nonce
    }

    pub fn hash(&self) -> &[u8; TOKEN_BYTES] {
        &self.hash
    }

    /// Lowercase hex of the hash; the token's identity in the ledger.
    pub fn hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn nonce_hex(&self) -> String {
        hex::encode(self.nonce)
    }

    /// Integer encoding for signing, see [`hash_to_integer`].
    pub fn to_integer(&self, modulus: &BigInt) -> BigInt {
        hash_to_integer(&self.hash, modulus)
    }
}

pub fn token_hash(election_id: &str, nonce: &[u8; NONCE_BYTES]) -> [u8; TOKEN_BYTES] {
    let mut hasher = Sha256::new();
    hasher.update(election_id.as_bytes());
    hasher.update(nonce);
    hasher.finalize().into()
}

/// Big-endian integer of the hash, reduced modulo `modulus` only when it is
/// not already smaller. Injective whenever the modulus exceeds 2^256.
pub fn hash_to_integer(hash: &[u8; TOKEN_BYTES], modulus: &BigInt) -> BigInt {
    let m = BigInt::from_bytes_be(Sign::Plus, hash);
    if &m >= modulus {
        m % modulus
    } else {
        m
    }
}

fn strip_line_terminators(field: &str) -> &str {
    field.trim_end_matches(|c| c == '\n' || c == '\r')
}

/// Decodes exactly `N` bytes of hex. Upper and lower case are accepted;
/// anything but trailing line terminators is rejected.
pub fn parse_fixed_hex<const N: usize>(field: &str) -> Result<[u8; N], InputError> {
    let field = strip_line_terminators(field);
    if field.len() != N * 2 {
        return Err(InputError::WrongLength {
            expected: N * 2,
            found: field.len(),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(field, &mut out).map_err(|e| InputError::InvalidHex(e.to_string()))?;
    Ok(out)
}

pub fn parse_nonce(field: &str) -> Result<[u8; NONCE_BYTES], InputError> {
    parse_fixed_hex::<NONCE_BYTES>(field)
}

pub fn parse_token_hash(field: &str) -> Result<[u8; TOKEN_BYTES], InputError> {
    parse_fixed_hex::<TOKEN_BYTES>(field)
}

/// Canonical (lowercase) ledger form of a token hash field.
pub fn normalize_token_hex(field: &str) -> Result<String, InputError> {
    parse_token_hash(field).map(hex::encode)
}

/// Variable-length hex integer, e.g. an RSA signature. No `0x` prefix.
pub fn parse_hex_integer(field: &str) -> Result<BigInt, InputError> {
    let field = strip_line_terminators(field);
    if field.is_empty() {
        return Err(InputError::Empty);
    }
    if let Some(bad) = field.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(InputError::InvalidHex(format!("invalid character {:?}", bad)));
    }
    BigInt::parse_bytes(field.as_bytes(), 16)
        .ok_or_else(|| InputError::InvalidHex(field.to_string()))
}

/// Decimal `"0"` or `"1"`.
pub fn parse_vote(field: &str) -> Result<bool, InputError> {
    match strip_line_terminators(field) {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(InputError::InvalidVote(other.to_string())),
    }
}

/// Parses the nonce and token hash fields and checks they belong together.
pub fn parse_token(election_id: &str, nonce_hex: &str, token_hex: &str) -> Result<Token, InputError> {
    let nonce = parse_nonce(nonce_hex)?;
    let presented = parse_token_hash(token_hex)?;
    let token = Token::from_nonce(election_id, nonce);
    if token.hash != presented {
        return Err(InputError::TokenMismatch);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_token_from_zero_nonce() {
        let token = Token::from_nonce("TEST", [0u8; NONCE_BYTES]);
        let mut hasher = Sha256::new();
        hasher.update(b"TEST");
        hasher.update([0u8; NONCE_BYTES]);
        let expected: [u8; TOKEN_BYTES] = hasher.finalize().into();
        assert_eq!(token.hash(), &expected);
        assert_eq!(token.hex(), hex::encode(expected));
        assert_eq!(token.hex().len(), 64);
        assert_eq!(token.nonce_hex(), "0".repeat(32));
    }

    #[test]
    fn test_election_id_changes_token() {
        let nonce = [7u8; NONCE_BYTES];
        assert_ne!(
            Token::from_nonce("TEST", nonce).hash(),
            Token::from_nonce("TEST2", nonce).hash()
        );
    }

    #[test]
    fn test_generated_tokens_differ() {
        let mut rng = StdRng::seed_from_u64(8);
        let t1 = Token::generate_with_rng(ELECTION_ID, &mut rng).unwrap();
        let t2 = Token::generate_with_rng(ELECTION_ID, &mut rng).unwrap();
        assert_ne!(t1, t2);
        let t3 = Token::generate(ELECTION_ID).unwrap();
        assert_ne!(t1, t3);
    }

    #[test]
    fn test_hash_to_integer_reduces_only_when_needed() {
        let hash = [0xffu8; TOKEN_BYTES];
        let wide = BigInt::from(1u8) << 300;
        assert_eq!(hash_to_integer(&hash, &wide), BigInt::from_bytes_be(Sign::Plus, &hash));
        let narrow = BigInt::from(1_000_003u32);
        let reduced = hash_to_integer(&hash, &narrow);
        assert!(reduced < narrow);
        assert_eq!(reduced, BigInt::from_bytes_be(Sign::Plus, &hash) % narrow);
    }

    #[test]
    fn test_parse_fixed_hex() {
        assert_eq!(parse_fixed_hex::<2>("abCD").unwrap(), [0xab, 0xcd]);
        assert_eq!(parse_fixed_hex::<2>("abcd\r\n").unwrap(), [0xab, 0xcd]);
        assert_eq!(
            parse_fixed_hex::<2>("abc"),
            Err(InputError::WrongLength { expected: 4, found: 3 })
        );
        assert_eq!(
            parse_fixed_hex::<2>("abcd ").unwrap_err(),
            InputError::WrongLength { expected: 4, found: 5 }
        );
        assert!(matches!(parse_fixed_hex::<2>("abzz"), Err(InputError::InvalidHex(_))));
        assert!(matches!(parse_fixed_hex::<2>("ab\ncd"), Err(InputError::WrongLength { .. })));
    }

    #[test]
    fn test_normalize_token_hex() {
        let token = Token::from_nonce("TEST", [1u8; NONCE_BYTES]);
        let upper = token.hex().to_uppercase();
        assert_eq!(normalize_token_hex(&upper).unwrap(), token.hex());
        assert!(normalize_token_hex(&token.hex()[..62]).is_err());
    }

    #[test]
    fn test_parse_hex_integer() {
        assert_eq!(parse_hex_integer("ff\n").unwrap(), BigInt::from(255u32));
        assert_eq!(parse_hex_integer("abc").unwrap(), BigInt::from(0xabcu32));
        assert_eq!(parse_hex_integer("\n"), Err(InputError::Empty));
        assert!(matches!(parse_hex_integer("0x1f"), Err(InputError::InvalidHex(_))));
        assert!(matches!(parse_hex_integer("-1f"), Err(InputError::InvalidHex(_))));
        assert!(matches!(parse_hex_integer("1f garbage"), Err(InputError::InvalidHex(_))));
    }

    #[test]
    fn test_parse_vote() {
        assert_eq!(parse_vote("0"), Ok(false));
        assert_eq!(parse_vote("1\n"), Ok(true));
        assert!(matches!(parse_vote("2"), Err(InputError::InvalidVote(_))));
        assert!(matches!(parse_vote("yes"), Err(InputError::InvalidVote(_))));
        assert!(matches!(parse_vote(""), Err(InputError::InvalidVote(_))));
    }

    #[test]
    fn test_parse_token() {
        let token = Token::from_nonce("TEST", [3u8; NONCE_BYTES]);
        let parsed = parse_token("TEST", &token.nonce_hex(), &token.hex()).unwrap();
        assert_eq!(parsed, token);

        let other = Token::from_nonce("TEST", [4u8; NONCE_BYTES]);
        assert_eq!(
            parse_token("TEST", &token.nonce_hex(), &other.hex()),
            Err(InputError::TokenMismatch)
        );
        assert_eq!(
            parse_token("OTHER", &token.nonce_hex(), &token.hex()),
            Err(InputError::TokenMismatch)
        );
    }
}
