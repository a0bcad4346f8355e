use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Zero};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

use crate::functions::{mod_pow, FunctionError};
use crate::pub_key::{PubKeyError, PublicKey};

#[derive(Error, Debug)]
pub enum PrivKeyError {
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(#[from] PubKeyError),
    #[error("L(u) is not an integer: u - 1 is not divisible by n")]
    NotIntegral,
    #[error("modular arithmetic failed: {0}")]
    Arithmetic(#[from] FunctionError),
}

/// Paillier private key `(lambda, mu)` where `mu = L(g^lambda mod n^2)^-1 mod n`.
///
/// Both components are wiped on drop.
#[derive(Clone)]
pub struct PrivateKey {
    pub_key: PublicKey,
    lambda: BigInt,
    mu: BigInt,
}

impl Zeroize for PrivateKey {
    fn zeroize(&mut self) {
        self.lambda = BigInt::zero();
        self.mu = BigInt::zero();
        // The public key is not sensitive
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("pub_key", &self.pub_key)
            .field("lambda", &"<redacted>")
            .field("mu", &"<redacted>")
            .finish()
    }
}

impl PrivateKey {
    pub(crate) fn new(pub_key: PublicKey, lambda: BigInt, mu: BigInt) -> Self {
        PrivateKey {
            pub_key,
            lambda,
            mu,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.pub_key
    }

    /// `L(c^lambda mod n^2) * mu mod n`.
    pub fn decrypt(&self, c: &BigInt) -> Result<BigInt, PrivKeyError> {
        self.pub_key.validate_ciphertext(c)?;
        let u = mod_pow(c, &self.lambda, &self.pub_key.n_squared)?;
        let l = l_function(&u, &self.pub_key.n).ok_or(PrivKeyError::NotIntegral)?;
        Ok((l * &self.mu) % &self.pub_key.n)
    }
}

/// `L(u) = (u - 1) / n`, or `None` when the division is not exact.
pub(crate) fn l_function(u: &BigInt, n: &BigInt) -> Option<BigInt> {
    let (quotient, remainder) = (u - BigInt::one()).div_rem(n);
    if remainder.is_zero() {
        Some(quotient)
    } else {
        None
    }
}
