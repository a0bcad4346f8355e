use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("unknown identity")]
    UnknownIdentity,
    #[error("wrong one-time code")]
    WrongCode,
    #[error("identity already received a token")]
    AlreadyIssued,
}

pub trait IdentityVerifier {
    /// Size of the roster; registration ends once every identity holds a token.
    fn eligible_count(&self) -> u64;

    fn verify(&self, identity: &str, code: &str) -> Result<(), AuthError>;
}

/// In-memory roster of identifiers and their one-time codes, sorted by
/// identifier.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    codes: BTreeMap<String, String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the identity was already present.
    pub fn add(&mut self, identity: impl Into<String>, code: impl Into<String>) -> bool {
        let identity = identity.into();
        if self.codes.contains_key(&identity) {
            return false;
        }
        self.codes.insert(identity, code.into());
        true
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.codes.contains_key(identity)
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.codes.keys().map(String::as_str)
    }
}

impl<I, C> FromIterator<(I, C)> for Roster
where
    I: Into<String>,
    C: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (I, C)>>(iter: T) -> Self {
        let mut roster = Roster::new();
        for (identity, code) in iter {
            roster.add(identity, code);
        }
        roster
    }
}

impl IdentityVerifier for Roster {
    fn eligible_count(&self) -> u64 {
        self.codes.len() as u64
    }

    fn verify(&self, identity: &str, code: &str) -> Result<(), AuthError> {
        let expected = self
            .codes
            .get(identity)
            .ok_or(AuthError::UnknownIdentity)?;
        if expected.trim() != code.trim() {
            return Err(AuthError::WrongCode);
        }
        Ok(())
    }
}
