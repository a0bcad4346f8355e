use num_bigint::BigInt;
use num_traits::{One, Zero};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

use crate::functions::{gcd, mod_pow, random_unit, FunctionError};

#[derive(Error, Debug)]
pub enum PubKeyError {
    #[error("empty ciphertext list")]
    EmptyCiphertextList,
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),
    #[error("message out of range: must lie in [0, n)")]
    MessageOutOfRange,
    #[error("random number generation failed: {0}")]
    RandomNumberError(#[source] FunctionError),
    #[error("modular arithmetic failed: {0}")]
    Arithmetic(#[from] FunctionError),
}

/// Paillier public key `(n, n^2, g)` with `g = n + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub n: BigInt,
    pub n_squared: BigInt,
    pub g: BigInt,
}

impl PublicKey {
    pub fn new(n: BigInt) -> Self {
        let n_squared = &n * &n;
        let g = &n + BigInt::one();
        PublicKey { n, n_squared, g }
    }

    pub fn bits(&self) -> u64 {
        self.n.bits()
    }

    /// Encryption of zero without randomness: the starting point of every
    /// running tally.
    pub fn identity(&self) -> BigInt {
        BigInt::one()
    }

    pub fn encrypt(&self, message: &BigInt) -> Result<BigInt, PubKeyError> {
        self.encrypt_with_rng(message, &mut OsRng)
    }

    /// Encrypts under fresh randomness drawn from `rng`. The randomness is
    /// dropped after use; reusing it would reveal equal plaintexts.
    pub fn encrypt_with_rng(
        &self,
        message: &BigInt,
        rng: &mut impl RngCore,
    ) -> Result<BigInt, PubKeyError> {
        let r = self.random_unit(rng)?;
        self.encrypt_fixed(message, &r)
    }

    pub fn encrypt_vote(&self, vote: bool, rng: &mut impl RngCore) -> Result<BigInt, PubKeyError> {
        let message = if vote { BigInt::one() } else { BigInt::zero() };
        self.encrypt_with_rng(&message, rng)
    }

    /// `g^m * r^n mod n^2`.
    pub fn encrypt_fixed(&self, message: &BigInt, r: &BigInt) -> Result<BigInt, PubKeyError> {
        if message < &BigInt::zero() || message >= &self.n {
            return Err(PubKeyError::MessageOutOfRange);
        }
        let g_m = mod_pow(&self.g, message, &self.n_squared)?;
        let r_n = mod_pow(r, &self.n, &self.n_squared)?;
        Ok((g_m * r_n) % &self.n_squared)
    }

    /// Homomorphic addition of a list of ciphertexts.
    pub fn add(&self, c_list: &[BigInt]) -> Result<BigInt, PubKeyError> {
        if c_list.is_empty() {
            return Err(PubKeyError::EmptyCiphertextList);
        }
        let mut sum = self.identity();
        for (i, ci) in c_list.iter().enumerate() {
            self.validate_ciphertext(ci).map_err(|_| {
                PubKeyError::InvalidCiphertext(format!("ciphertext {} out of bounds", i + 1))
            })?;
            sum = (&sum * ci) % &self.n_squared;
        }
        Ok(sum)
    }

    /// `running * c mod n^2`. Never decrypts either operand.
    pub fn tally_add(&self, running: &BigInt, c: &BigInt) -> Result<BigInt, PubKeyError> {
        self.validate_ciphertext(running)?;
        self.validate_ciphertext(c)?;
        Ok((running * c) % &self.n_squared)
    }

    /// A ciphertext must be a unit modulo `n^2`.
    pub fn validate_ciphertext(&self, c: &BigInt) -> Result<(), PubKeyError> {
        if c <= &BigInt::zero() || c >= &self.n_squared {
            return Err(PubKeyError::InvalidCiphertext(
                "ciphertext out of bounds".to_string(),
            ));
        }
        if !gcd(c, &self.n).is_one() {
            return Err(PubKeyError::InvalidCiphertext(
                "ciphertext shares a factor with n".to_string(),
            ));
        }
        Ok(())
    }

    pub fn random_unit(&self, rng: &mut impl RngCore) -> Result<BigInt, PubKeyError> {
        random_unit(&self.n, rng).map_err(PubKeyError::RandomNumberError)
    }
}
