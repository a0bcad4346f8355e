use std::io;
use thiserror::Error;

use crate::blind::BlindError;
use crate::config::ConfigError;
use crate::election::ElectionError;
use crate::functions::FunctionError;
use crate::keygen::NewKeyError;
use crate::ledger::LedgerError;
use crate::priv_key::PrivKeyError;
use crate::pub_key::PubKeyError;
use crate::roster::AuthError;
use crate::tally::TallyError;
use crate::token::InputError;

/// Only [`Error::is_fatal`] errors abort a session. Every other error rejects
/// the request at hand and leaves all state untouched.
#[derive(Debug, Error)]
pub enum Error {
    #[error("blind-ballot: malformed input: {0}")]
    MalformedInput(#[from] InputError),
    #[error("blind-ballot: authentication failed: {0}")]
    AuthenticationFailure(#[from] AuthError),
    #[error("blind-ballot: signature does not verify")]
    InvalidSignature,
    #[error("blind-ballot: token not registered or already spent")]
    TokenNotFound,
    #[error("blind-ballot: token already registered")]
    AlreadyRegistered,
    #[error("blind-ballot: {0}")]
    WrongPhase(#[from] ElectionError),
    #[error("blind-ballot: signing authority unavailable: {0}")]
    AuthorityUnavailable(String),
    #[error("blind-ballot: no blinding factor coprime to the modulus")]
    NoCoprimeBlind,
    #[error("blind-ballot: invariant violation: {0}")]
    InvariantViolation(String),
    #[error("blind-ballot: ledger storage failure: {0}")]
    StorageFailure(#[source] io::Error),
    #[error("blind-ballot: randomness source failure: {0}")]
    Randomness(#[source] FunctionError),
    #[error("blind-ballot: configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether the session must be aborted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvariantViolation(_) | Error::Randomness(_))
    }
}

impl From<FunctionError> for Error {
    fn from(err: FunctionError) -> Self {
        match err {
            FunctionError::RandomNumberGeneration | FunctionError::EntropyUnavailable => {
                Error::Randomness(err)
            }
            other => Error::InvariantViolation(other.to_string()),
        }
    }
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AlreadyRegistered => Error::AlreadyRegistered,
            LedgerError::NotFound => Error::TokenNotFound,
            LedgerError::MalformedToken(e) => Error::MalformedInput(e),
            LedgerError::Storage(e) => Error::StorageFailure(e),
        }
    }
}

impl From<BlindError> for Error {
    fn from(err: BlindError) -> Self {
        match err {
            BlindError::NoCoprimeBlind => Error::NoCoprimeBlind,
            BlindError::AuthorityUnavailable(reason) => Error::AuthorityUnavailable(reason),
            BlindError::InvalidSignature => Error::InvalidSignature,
            BlindError::OutOfRange => Error::MalformedInput(InputError::OutOfRange),
            BlindError::MalformedKey(e) => Error::MalformedInput(e),
            BlindError::Arithmetic(e) => e.into(),
            BlindError::ModulusTooSmall(_) => Error::InvariantViolation(err.to_string()),
        }
    }
}

impl From<NewKeyError> for Error {
    fn from(err: NewKeyError) -> Self {
        match err {
            NewKeyError::PrimeGeneration(e) => e.into(),
            NewKeyError::InvariantViolation(reason) => Error::InvariantViolation(reason),
            other => Error::InvariantViolation(other.to_string()),
        }
    }
}

impl From<PubKeyError> for Error {
    fn from(err: PubKeyError) -> Self {
        match err {
            PubKeyError::RandomNumberError(e) | PubKeyError::Arithmetic(e) => e.into(),
            other => Error::InvariantViolation(other.to_string()),
        }
    }
}

impl From<PrivKeyError> for Error {
    fn from(err: PrivKeyError) -> Self {
        match err {
            PrivKeyError::InvalidCiphertext(e) => e.into(),
            PrivKeyError::Arithmetic(e) => e.into(),
            PrivKeyError::NotIntegral => Error::InvariantViolation(err.to_string()),
        }
    }
}

impl From<TallyError> for Error {
    fn from(err: TallyError) -> Self {
        match err {
            TallyError::Encryption(e) => e.into(),
            TallyError::Decryption(e) => e.into(),
            other => Error::InvariantViolation(other.to_string()),
        }
    }
}
