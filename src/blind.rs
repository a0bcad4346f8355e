//! The voter blinds the integer encoding of a token with a random unit `r`,
//! the authority raises the blinded value to its private exponent, and the
//! voter strips `r` to obtain an ordinary RSA signature. The authority never
//! sees the token it signs.

use num_bigint::BigInt;
use num_traits::{One, Zero};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

use crate::functions::*;
use crate::token::{parse_hex_integer, InputError, Token};

pub const PUBLIC_EXPONENT: u32 = 65537;

const MIN_RSA_BITS: usize = 64;

#[derive(Error, Debug)]
pub enum BlindError {
    #[error("no blinding factor coprime to the modulus could be found")]
    NoCoprimeBlind,
    #[error("signing authority declined the request: {0}")]
    AuthorityUnavailable(String),
    #[error("signature does not verify")]
    InvalidSignature,
    #[error("value out of range: must lie in [0, N)")]
    OutOfRange,
    #[error("RSA modulus too small: {0} bits")]
    ModulusTooSmall(usize),
    #[error("malformed public key: {0}")]
    MalformedKey(#[from] InputError),
    #[error("modular arithmetic failed: {0}")]
    Arithmetic(#[from] FunctionError),
}

/// Published half of the authority key: `(N, e)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    pub n: BigInt,
    pub e: BigInt,
}

impl RsaPublicKey {
    /// `(N, e)` as lowercase hex without a `0x` prefix.
    pub fn to_hex(&self) -> (String, String) {
        (self.n.to_str_radix(16), self.e.to_str_radix(16))
    }

    pub fn from_hex(n: &str, e: &str) -> Result<Self, BlindError> {
        let n = parse_hex_integer(n)?;
        let e = parse_hex_integer(e)?;
        if n <= BigInt::one() || e <= BigInt::one() {
            return Err(BlindError::OutOfRange);
        }
        Ok(RsaPublicKey { n, e })
    }

    fn check_range(&self, value: &BigInt) -> Result<(), BlindError> {
        if value < &BigInt::zero() || value >= &self.n {
            return Err(BlindError::OutOfRange);
        }
        Ok(())
    }

    /// Accepts iff `s^e mod N == m`.
    pub fn verify(&self, m: &BigInt, s: &BigInt) -> Result<(), BlindError> {
        if self.check_range(s).is_err() {
            return Err(BlindError::InvalidSignature);
        }
        if &mod_pow(s, &self.e, &self.n)? == m {
            Ok(())
        } else {
            Err(BlindError::InvalidSignature)
        }
    }

    pub fn verify_token(&self, token: &Token, s: &BigInt) -> Result<(), BlindError> {
        self.verify(&token.to_integer(&self.n), s)
    }
}

/// Authority key pair. `d` is wiped on drop and never printed.
pub struct RsaKeyPair {
    public: RsaPublicKey,
    d: BigInt,
}

impl Zeroize for RsaKeyPair {
    fn zeroize(&mut self) {
        self.d = BigInt::zero();
    }
}

impl Drop for RsaKeyPair {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("public", &self.public)
            .field("d", &"<redacted>")
            .finish()
    }
}

impl RsaKeyPair {
    /// Generates an RSA key with `e = 65537` and `d = e^-1 mod lcm(p-1, q-1)`.
    pub fn generate(bits: usize) -> Result<Self, BlindError> {
        if bits < MIN_RSA_BITS {
            return Err(BlindError::ModulusTooSmall(bits));
        }
        let e = BigInt::from(PUBLIC_EXPONENT);
        let p_bits = (bits + 1) / 2;
        let q_bits = bits - p_bits;
        loop {
            let p = generate_prime(p_bits)?;
            let q = generate_prime(q_bits)?;
            if p == q {
                continue;
            }
            let lambda = lcm(&(&p - BigInt::one()), &(&q - BigInt::one()));
            let d = match mod_inverse(&e, &lambda) {
                Ok(d) => d,
                // gcd(e, lambda) != 1, draw new primes
                Err(FunctionError::NoInverse) => continue,
                Err(err) => return Err(err.into()),
            };
            let n = p * q;
            log::debug!("generated {}-bit RSA signing key", n.bits());
            return Ok(RsaKeyPair {
                public: RsaPublicKey { n, e },
                d,
            });
        }
    }

    /// Assembles a key pair from known components, checking that `d`
    /// inverts `e` on a sample value.
    pub fn from_components(n: BigInt, e: BigInt, d: BigInt) -> Result<Self, BlindError> {
        let key_pair = RsaKeyPair {
            public: RsaPublicKey { n, e },
            d,
        };
        let witness = BigInt::from(2u8);
        let signed = mod_pow(&witness, &key_pair.d, &key_pair.public.n)?;
        key_pair.public.verify(&witness, &signed)?;
        Ok(key_pair)
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// `m_blinded^d mod N`. The authority learns nothing about the token.
    pub fn sign_blinded(&self, blinded: &BlindedMessage) -> Result<BlindSignature, BlindError> {
        self.public.check_range(&blinded.0)?;
        Ok(BlindSignature(mod_pow(&blinded.0, &self.d, &self.public.n)?))
    }
}

/// `m * r^e mod N`, the only value the authority sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlindedMessage(pub BigInt);

/// The authority's answer, `m_blinded^d mod N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlindSignature(pub BigInt);

/// The voter's secret blinding factor `r`.
pub struct BlindingFactor(BigInt);

impl Zeroize for BlindingFactor {
    fn zeroize(&mut self) {
        self.0 = BigInt::zero();
    }
}

impl Drop for BlindingFactor {
    fn drop(&mut self) {
        self.zeroize();
    }
}

pub fn blind(
    m: &BigInt,
    public: &RsaPublicKey,
    rng: &mut impl RngCore,
) -> Result<(BlindedMessage, BlindingFactor), BlindError> {
    public.check_range(m)?;
    let r = random_unit(&public.n, rng).map_err(|err| match err {
        FunctionError::NoUnit(_) => BlindError::NoCoprimeBlind,
        other => other.into(),
    })?;
    let r_e = mod_pow(&r, &public.e, &public.n)?;
    let m_blinded = (m * r_e) % &public.n;
    Ok((BlindedMessage(m_blinded), BlindingFactor(r)))
}

/// `s_blinded * r^-1 mod N`.
pub fn unblind(
    blind_signature: &BlindSignature,
    factor: &BlindingFactor,
    public: &RsaPublicKey,
) -> Result<BigInt, BlindError> {
    public.check_range(&blind_signature.0)?;
    let r_inv = mod_inverse(&factor.0, &public.n)?;
    Ok((&blind_signature.0 * r_inv) % &public.n)
}

/// The authority side of issuance, with an optional cap on the number of
/// signatures it is willing to produce.
#[derive(Debug)]
pub struct BlindSigner {
    key_pair: RsaKeyPair,
    quota: Option<u64>,
    issued: u64,
}

impl BlindSigner {
    pub fn new(key_pair: RsaKeyPair, quota: Option<u64>) -> Self {
        BlindSigner {
            key_pair,
            quota,
            issued: 0,
        }
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        self.key_pair.public_key()
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn sign(&mut self, blinded: &BlindedMessage) -> Result<BlindSignature, BlindError> {
        if let Some(quota) = self.quota {
            if self.issued >= quota {
                return Err(BlindError::AuthorityUnavailable(format!(
                    "issuance quota of {} exhausted",
                    quota
                )));
            }
        }
        let signature = self.key_pair.sign_blinded(blinded)?;
        self.issued += 1;
        Ok(signature)
    }

    /// Returns the slot taken by the last `sign` when its signature was
    /// never stored.
    pub fn release(&mut self) {
        self.issued = self.issued.saturating_sub(1);
    }
}

/// Voter-side state between sending the blinded token and receiving the
/// authority's answer.
pub struct CredentialRequest {
    token: Token,
    message: BigInt,
    factor: BlindingFactor,
    blinded: BlindedMessage,
}

impl CredentialRequest {
    pub fn new(token: Token, public: &RsaPublicKey) -> Result<Self, BlindError> {
        Self::new_with_rng(token, public, &mut OsRng)
    }

    pub fn new_with_rng(
        token: Token,
        public: &RsaPublicKey,
        rng: &mut impl RngCore,
    ) -> Result<Self, BlindError> {
        let message = token.to_integer(&public.n);
        let (blinded, factor) = blind(&message, public, rng)?;
        Ok(CredentialRequest {
            token,
            message,
            factor,
            blinded,
        })
    }

    pub fn blinded(&self) -> &BlindedMessage {
        &self.blinded
    }

    /// Unblinds the authority's answer and checks it before handing back a
    /// credential.
    pub fn finish(
        self,
        blind_signature: &BlindSignature,
        public: &RsaPublicKey,
    ) -> Result<Credential, BlindError> {
        let signature = unblind(blind_signature, &self.factor, public)?;
        public.verify(&self.message, &signature)?;
        Ok(Credential {
            token: self.token.clone(),
            signature,
        })
    }
}

/// A token and the authority's signature on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: Token,
    pub signature: BigInt,
}

/// Hex fields presented at the voting boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialFields {
    pub nonce: String,
    pub token: String,
    pub signature: String,
}

impl Credential {
    pub fn to_fields(&self) -> CredentialFields {
        CredentialFields {
            nonce: self.token.nonce_hex(),
            token: self.token.hex(),
            signature: self.signature.to_str_radix(16),
        }
    }
}
