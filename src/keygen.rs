use num_bigint::BigInt;
use num_traits::One;
use rand::rngs::OsRng;
use thiserror::Error;

use crate::functions::*;
use crate::priv_key::{l_function, PrivKeyError, PrivateKey};
use crate::pub_key::PublicKey;
use crate::tally::TallyAuthority;

/// Bounds for the narrow demonstration primes.
pub const DEMO_PRIME_LOW: u64 = 1 << 15;
pub const DEMO_PRIME_HIGH: u64 = (1 << 16) - 1;

const MIN_BIT_SIZE: usize = 64;

/// Modulus-size policy for the tally key.
///
/// `Demo` draws two primes from `[2^15, 2^16 - 1]`. Such a key is trivially
/// factorable and only meant for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySize {
    Demo,
    Bits(usize),
}

impl Default for KeySize {
    fn default() -> Self {
        KeySize::Bits(2048)
    }
}

#[derive(Debug, Clone)]
pub struct FixedParams {
    pub p: BigInt,
    pub q: BigInt,
}

impl FixedParams {
    pub fn validate(&self) -> Result<(), NewKeyError> {
        if self.p == self.q {
            return Err(NewKeyError::SamePrimes);
        }
        for prime in [&self.p, &self.q] {
            if !is_prime(prime) {
                return Err(NewKeyError::NotPrime(prime.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum NewKeyError {
    #[error("bit size too small: {0} < 64")]
    BitSizeTooSmall(usize),
    #[error("p and q must be distinct")]
    SamePrimes,
    #[error("{0} is not prime")]
    NotPrime(BigInt),
    #[error("failed to generate primes: {0}")]
    PrimeGeneration(#[from] FunctionError),
    #[error("key invariant violated: {0}")]
    InvariantViolation(String),
}

/// A Paillier key pair. The private half never leaves this value; callers
/// reach it only through [`TallyAuthority::decrypt_tally`].
#[derive(Debug)]
pub struct PaillierKeyPair {
    pub_key: PublicKey,
    priv_key: PrivateKey,
}

impl PaillierKeyPair {
    pub fn new(size: KeySize) -> Result<Self, NewKeyError> {
        let (p, q) = match size {
            KeySize::Demo => {
                let lo = BigInt::from(DEMO_PRIME_LOW);
                let hi = BigInt::from(DEMO_PRIME_HIGH);
                let p = random_prime_in_range(&lo, &hi, &mut OsRng)?;
                let q = loop {
                    let q = random_prime_in_range(&lo, &hi, &mut OsRng)?;
                    if q != p {
                        break q;
                    }
                };
                (p, q)
            }
            KeySize::Bits(bit_size) => {
                if bit_size < MIN_BIT_SIZE {
                    return Err(NewKeyError::BitSizeTooSmall(bit_size));
                }
                let p_prime_size = (bit_size + 1) / 2;
                let q_prime_size = bit_size - p_prime_size;
                let p = generate_prime(p_prime_size)?;
                let q = loop {
                    let q = generate_prime(q_prime_size)?;
                    if q != p {
                        break q;
                    }
                };
                (p, q)
            }
        };

        let params = FixedParams { p, q };
        let key_pair = Self::new_fixed_key(&params)?;
        log::debug!("generated {}-bit paillier modulus", key_pair.pub_key.bits());
        Ok(key_pair)
    }

    /// Builds the key pair from caller-supplied primes. Aborts with
    /// [`NewKeyError::InvariantViolation`] when `L(g^lambda mod n^2)` is not
    /// an integer or not invertible modulo `n`.
    pub fn new_fixed_key(params: &FixedParams) -> Result<Self, NewKeyError> {
        params.validate()?;

        let n = &params.p * &params.q;
        let lambda = lcm(
            &(&params.p - BigInt::one()),
            &(&params.q - BigInt::one()),
        );
        let pub_key = PublicKey::new(n);

        let u = mod_pow(&pub_key.g, &lambda, &pub_key.n_squared)?;
        let l_u = l_function(&u, &pub_key.n).ok_or_else(|| {
            NewKeyError::InvariantViolation("L(u) is not an integer".to_string())
        })?;
        let mu = mod_inverse(&l_u, &pub_key.n).map_err(|_| {
            NewKeyError::InvariantViolation("L(u) is not invertible modulo n".to_string())
        })?;

        let priv_key = PrivateKey::new(pub_key.clone(), lambda, mu);
        Ok(PaillierKeyPair { pub_key, priv_key })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.pub_key
    }
}

impl TallyAuthority for PaillierKeyPair {
    fn public_key(&self) -> &PublicKey {
        &self.pub_key
    }

    fn decrypt_tally(&self, tally: &BigInt) -> Result<BigInt, PrivKeyError> {
        self.priv_key.decrypt(tally)
    }
}
