use num_bigint::{BigInt, Sign};
use num_integer::Integer as _;
use num_traits::{One, Signed, ToPrimitive, Zero};
use rand::{rngs::OsRng, RngCore};
use rug::{
    integer::{IsPrime, Order},
    rand::RandState,
    Integer,
};
use std::convert::TryFrom;
use thiserror::Error;
use zeroize::Zeroize;

/// Rounds used for the probabilistic test above the 64-bit range.
const PRIME_CHECK_ROUNDS: u32 = 40;

const SMALL_PRIMES: [u64; 9] = [2, 3, 5, 7, 11, 13, 17, 19, 23];

// Deterministic for every n < 2^64.
const MR_WITNESSES: [u64; 7] = [2, 325, 9375, 28178, 450775, 9780504, 1795265022];

/// Samples drawn per bit of the upper bound before a range is scanned.
const PRIME_SAMPLES_PER_BIT: u64 = 64;

/// Ranges at most this wide are scanned exhaustively once sampling gives up.
const PRIME_SCAN_LIMIT: u64 = 1 << 16;

const UNIT_ATTEMPTS: usize = 128;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FunctionError {
    #[error("random number generation failed")]
    RandomNumberGeneration,
    #[error("operating system entropy source returned no entropy")]
    EntropyUnavailable,
    #[error("invalid bit length")]
    InvalidBitLength,
    #[error("modulus must be positive")]
    InvalidModulus,
    #[error("exponent must be non-negative")]
    NegativeExponent,
    #[error("no modular inverse: gcd(a, m) != 1")]
    NoInverse,
    #[error("invalid range: lower bound exceeds upper bound")]
    InvalidRange,
    #[error("range [{0}, {1}] contains no primes")]
    RangeExhausted(BigInt, BigInt),
    #[error("no unit found modulo {0}")]
    NoUnit(BigInt),
}

/// Draws a sample from the operating system RNG. Callers must run this
/// before generating any key material; a failure here is fatal.
pub fn check_entropy() -> Result<(), FunctionError> {
    let mut sample = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut sample)
        .map_err(|_| FunctionError::RandomNumberGeneration)?;
    let empty = sample.iter().all(|b| *b == 0);
    sample.zeroize();
    if empty {
        return Err(FunctionError::EntropyUnavailable);
    }
    Ok(())
}

/// Uniform sample in `[0, n)`.
pub fn random_mod(n: &BigInt, rng: &mut impl RngCore) -> Result<BigInt, FunctionError> {
    if n <= &BigInt::zero() {
        return Err(FunctionError::RandomNumberGeneration);
    }
    let bits = n.bits() as usize;
    let mut bytes = vec![0u8; (bits + 7) / 8];
    let excess = bytes.len() * 8 - bits;
    let mut result;
    loop {
        rng.try_fill_bytes(&mut bytes)
            .map_err(|_| FunctionError::RandomNumberGeneration)?;
        bytes[0] &= 0xff >> excess;
        result = BigInt::from_bytes_be(Sign::Plus, &bytes);
        if result < *n {
            break;
        }
    }
    bytes.zeroize();
    Ok(result)
}

/// Uniform sample in the closed range `[lo, hi]`.
pub fn random_in_range(
    lo: &BigInt,
    hi: &BigInt,
    rng: &mut impl RngCore,
) -> Result<BigInt, FunctionError> {
    if lo > hi {
        return Err(FunctionError::InvalidRange);
    }
    let width = hi - lo + BigInt::one();
    Ok(lo + random_mod(&width, rng)?)
}

/// Rejection-samples `[1, n)` until the sample is coprime to `n`.
pub fn random_unit(n: &BigInt, rng: &mut impl RngCore) -> Result<BigInt, FunctionError> {
    if n <= &BigInt::one() {
        return Err(FunctionError::NoUnit(n.clone()));
    }
    let hi = n - BigInt::one();
    for _ in 0..UNIT_ATTEMPTS {
        let candidate = random_in_range(&BigInt::one(), &hi, rng)?;
        if gcd(&candidate, n).is_one() {
            return Ok(candidate);
        }
    }
    Err(FunctionError::NoUnit(n.clone()))
}

/// Samples uniformly in `[lo, hi]` until [`is_prime`] accepts.
///
/// The caller must pick a range wide enough that primes exist. When sampling
/// gives up on a narrow range it is scanned exhaustively, so an empty range
/// is reported as [`FunctionError::RangeExhausted`] instead of looping.
pub fn random_prime_in_range(
    lo: &BigInt,
    hi: &BigInt,
    rng: &mut impl RngCore,
) -> Result<BigInt, FunctionError> {
    if lo > hi {
        return Err(FunctionError::InvalidRange);
    }
    let two = BigInt::from(2u8);
    let start = if lo < &two { two } else { lo.clone() };
    if &start > hi {
        return Err(FunctionError::RangeExhausted(lo.clone(), hi.clone()));
    }

    let attempts = PRIME_SAMPLES_PER_BIT * (hi.bits() + 1);
    for _ in 0..attempts {
        let candidate = random_in_range(&start, hi, rng)?;
        if is_prime(&candidate) {
            return Ok(candidate);
        }
    }

    let width = hi - &start + BigInt::one();
    if width > BigInt::from(PRIME_SCAN_LIMIT) {
        return Err(FunctionError::RangeExhausted(lo.clone(), hi.clone()));
    }
    let mut primes = Vec::new();
    let mut candidate = start;
    while &candidate <= hi {
        if is_prime(&candidate) {
            primes.push(candidate.clone());
        }
        candidate += 1u8;
    }
    if primes.is_empty() {
        return Err(FunctionError::RangeExhausted(lo.clone(), hi.clone()));
    }
    let pick = random_mod(&BigInt::from(primes.len()), rng)?
        .to_usize()
        .ok_or(FunctionError::RandomNumberGeneration)?;
    Ok(primes.swap_remove(pick))
}

/// Generates a random prime of exactly `bit_len` bits with the top two bits
/// set, so that the product of two such primes has `2 * bit_len` bits.
pub fn generate_prime(bit_len: usize) -> Result<BigInt, FunctionError> {
    if bit_len < 2 {
        return Err(FunctionError::InvalidBitLength);
    }
    let bit_len_u32 = u32::try_from(bit_len).map_err(|_| FunctionError::InvalidBitLength)?;
    let mut seed = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|_| FunctionError::RandomNumberGeneration)?;
    let mut rand_state = RandState::new();
    rand_state.seed(&Integer::from_digits(&seed, Order::Msf));
    seed.zeroize();
    loop {
        let mut candidate: Integer = Integer::random_bits(bit_len_u32, &mut rand_state).into();
        candidate.set_bit(bit_len_u32 - 1, true);
        candidate.set_bit(bit_len_u32 - 2, true);
        candidate.set_bit(0, true);
        if candidate.is_probably_prime(PRIME_CHECK_ROUNDS) != IsPrime::No {
            return Ok(BigInt::from_bytes_be(
                Sign::Plus,
                &candidate.to_digits::<u8>(Order::Msf),
            ));
        }
    }
}

/// Primality for arbitrary-precision values: deterministic for anything that
/// fits in 64 bits, probabilistic with a negligible error bound above that.
pub fn is_prime(n: &BigInt) -> bool {
    if n.sign() == Sign::Minus {
        return false;
    }
    match n.to_u64() {
        Some(small) => is_prime_u64(small),
        None => {
            let wide = Integer::from_digits(&n.to_bytes_be().1, Order::Msf);
            wide.is_probably_prime(PRIME_CHECK_ROUNDS) != IsPrime::No
        }
    }
}

/// Deterministic Miller-Rabin over the fixed seven-witness set. Exact for
/// every 64-bit input.
pub fn is_prime_u64(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for &p in SMALL_PRIMES.iter() {
        if n == p {
            return true;
        }
        if n % p == 0 {
            return false;
        }
    }

    let mut d = n - 1;
    let mut s = 0u32;
    while d & 1 == 0 {
        d >>= 1;
        s += 1;
    }

    'witness: for &witness in MR_WITNESSES.iter() {
        let a = witness % n;
        if a == 0 {
            continue;
        }
        let mut x = pow_mod_u64_unchecked(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mod_mul_u64_unchecked(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// `a * b mod m` with a 128-bit intermediate product.
pub fn mod_mul_u64(a: u64, b: u64, m: u64) -> Result<u64, FunctionError> {
    if m == 0 {
        return Err(FunctionError::InvalidModulus);
    }
    Ok(mod_mul_u64_unchecked(a, b, m))
}

/// Square-and-multiply over 64-bit operands. `exp == 0` yields `1 mod m`.
pub fn mod_pow_u64(base: u64, exp: u64, m: u64) -> Result<u64, FunctionError> {
    if m == 0 {
        return Err(FunctionError::InvalidModulus);
    }
    Ok(pow_mod_u64_unchecked(base, exp, m))
}

fn mod_mul_u64_unchecked(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

fn pow_mod_u64_unchecked(base: u64, mut exp: u64, m: u64) -> u64 {
    let mut result = 1 % m;
    let mut x = base % m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mod_mul_u64_unchecked(result, x, m);
        }
        x = mod_mul_u64_unchecked(x, x, m);
        exp >>= 1;
    }
    result
}

/// `base^exp mod modulus`, result in `[0, modulus)`. Negative bases are
/// reduced first; even moduli are fine.
pub fn mod_pow(base: &BigInt, exp: &BigInt, modulus: &BigInt) -> Result<BigInt, FunctionError> {
    if modulus <= &BigInt::zero() {
        return Err(FunctionError::InvalidModulus);
    }
    if exp.sign() == Sign::Minus {
        return Err(FunctionError::NegativeExponent);
    }
    if modulus.is_one() {
        return Ok(BigInt::zero());
    }
    let base = base.mod_floor(modulus);
    Ok(base.modpow(exp, modulus))
}

/// Extended Euclid: returns `(g, x, y)` with `a*x + b*y = g`.
pub fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let (mut old_r, mut r) = (a.clone(), b.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    let (mut old_t, mut t) = (BigInt::zero(), BigInt::one());
    while !r.is_zero() {
        let q = &old_r / &r;
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);
        let next_t = &old_t - &q * &t;
        old_t = std::mem::replace(&mut t, next_t);
    }
    (old_r, old_s, old_t)
}

/// Inverse of `a` modulo `m`, normalized into `[0, m)`.
pub fn mod_inverse(a: &BigInt, m: &BigInt) -> Result<BigInt, FunctionError> {
    if m <= &BigInt::zero() {
        return Err(FunctionError::InvalidModulus);
    }
    let a = a.mod_floor(m);
    let (g, x, _) = extended_gcd(&a, m);
    if !g.is_one() {
        return Err(FunctionError::NoInverse);
    }
    Ok(x.mod_floor(m))
}

pub fn gcd(a: &BigInt, b: &BigInt) -> BigInt {
    let mut a = a.magnitude().clone();
    let mut b = b.magnitude().clone();
    while !b.is_zero() {
        let t = &a % &b;
        a = b;
        b = t;
    }
    BigInt::from(a)
}

/// `a / gcd(a, b) * b`, dividing first so the full product is never formed.
pub fn lcm(a: &BigInt, b: &BigInt) -> BigInt {
    if a.is_zero() || b.is_zero() {
        return BigInt::zero();
    }
    let g = gcd(a, b);
    (a / &g * b).abs()
}
