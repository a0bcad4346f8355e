use num_bigint::BigInt;
use rand::RngCore;
use thiserror::Error;

use crate::priv_key::PrivKeyError;
use crate::pub_key::{PubKeyError, PublicKey};

/// Holder of the Paillier private key. Implementors must keep the key inside
/// their own trust boundary and expose nothing but tally decryption.
pub trait TallyAuthority {
    fn public_key(&self) -> &PublicKey;

    fn decrypt_tally(&self, tally: &BigInt) -> Result<BigInt, PrivKeyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyState {
    Uninitialized,
    KeysGenerated,
    Tallying,
    Decrypted,
}

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("tally has no public key")]
    NotInitialized,
    #[error("operation not allowed in state {0:?}")]
    WrongState(TallyState),
    #[error("tally was already decrypted")]
    AlreadyDecrypted,
    #[error("staged vote was computed against a stale tally")]
    StaleStage,
    #[error("decryption authority holds a different key")]
    KeyMismatch,
    #[error("encryption failed: {0}")]
    Encryption(#[from] PubKeyError),
    #[error("decryption failed: {0}")]
    Decryption(#[from] PrivKeyError),
}

/// A vote that has been encrypted and folded into a candidate tally, but not
/// yet committed.
#[derive(Debug, Clone)]
pub struct StagedVote {
    ciphertext: BigInt,
    base: BigInt,
    next: BigInt,
}

impl StagedVote {
    pub fn ciphertext(&self) -> &BigInt {
        &self.ciphertext
    }
}

/// Moves `Uninitialized -> KeysGenerated -> Tallying -> Decrypted`. The
/// private key is consulted once, through [`TallyAuthority`], on the final
/// value.
#[derive(Debug, Clone)]
pub struct Tally {
    pub_key: Option<PublicKey>,
    running: BigInt,
    count: u64,
    state: TallyState,
}

impl Default for Tally {
    fn default() -> Self {
        Tally::new()
    }
}

impl Tally {
    pub fn new() -> Self {
        Tally {
            pub_key: None,
            running: BigInt::from(1u8),
            count: 0,
            state: TallyState::Uninitialized,
        }
    }

    pub fn with_public_key(pub_key: PublicKey) -> Self {
        let running = pub_key.identity();
        Tally {
            pub_key: Some(pub_key),
            running,
            count: 0,
            state: TallyState::KeysGenerated,
        }
    }

    pub fn install_key(&mut self, pub_key: PublicKey) -> Result<(), TallyError> {
        if self.state != TallyState::Uninitialized {
            return Err(TallyError::WrongState(self.state));
        }
        *self = Tally::with_public_key(pub_key);
        Ok(())
    }

    pub fn state(&self) -> TallyState {
        self.state
    }

    /// Number of votes committed so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// The current aggregate ciphertext. Safe to publish.
    pub fn ciphertext(&self) -> &BigInt {
        &self.running
    }

    fn open_key(&self) -> Result<&PublicKey, TallyError> {
        match self.state {
            TallyState::KeysGenerated | TallyState::Tallying => {
                self.pub_key.as_ref().ok_or(TallyError::NotInitialized)
            }
            TallyState::Uninitialized => Err(TallyError::NotInitialized),
            TallyState::Decrypted => Err(TallyError::AlreadyDecrypted),
        }
    }

    /// Encrypts `vote` under fresh randomness and computes the tally that
    /// would result from adding it. Nothing is mutated.
    pub fn stage(&self, vote: bool, rng: &mut impl RngCore) -> Result<StagedVote, TallyError> {
        let pub_key = self.open_key()?;
        let ciphertext = pub_key.encrypt_vote(vote, rng)?;
        self.stage_ciphertext(ciphertext)
    }

    pub fn stage_ciphertext(&self, ciphertext: BigInt) -> Result<StagedVote, TallyError> {
        let pub_key = self.open_key()?;
        let next = pub_key.tally_add(&self.running, &ciphertext)?;
        Ok(StagedVote {
            ciphertext,
            base: self.running.clone(),
            next,
        })
    }

    pub fn commit(&mut self, staged: StagedVote) -> Result<(), TallyError> {
        self.open_key()?;
        if staged.base != self.running {
            return Err(TallyError::StaleStage);
        }
        self.running = staged.next;
        self.count += 1;
        self.state = TallyState::Tallying;
        Ok(())
    }

    /// Adds an already encrypted vote.
    pub fn add_ciphertext(&mut self, ciphertext: BigInt) -> Result<(), TallyError> {
        let staged = self.stage_ciphertext(ciphertext)?;
        self.commit(staged)
    }

    /// Decrypts the aggregate. Allowed once; the tally is closed afterwards.
    pub fn decrypt(&mut self, authority: &impl TallyAuthority) -> Result<BigInt, TallyError> {
        let pub_key = self.open_key()?;
        if authority.public_key() != pub_key {
            return Err(TallyError::KeyMismatch);
        }
        let result = authority.decrypt_tally(&self.running)?;
        self.state = TallyState::Decrypted;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::{FixedParams, PaillierKeyPair};
    use num_traits::Zero;
    use rand::{rngs::StdRng, SeedableRng};

    fn create_test_authority() -> PaillierKeyPair {
        let params = FixedParams {
            p: BigInt::from(65521u32),
            q: BigInt::from(65519u32),
        };
        PaillierKeyPair::new_fixed_key(&params).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let authority = create_test_authority();
        let mut rng = StdRng::seed_from_u64(4);

        let mut tally = Tally::new();
        assert_eq!(tally.state(), TallyState::Uninitialized);
        match tally.stage(true, &mut rng) {
            Err(TallyError::NotInitialized) => (),
            _ => panic!("Expected NotInitialized error"),
        }

        tally.install_key(authority.public_key().clone()).unwrap();
        assert_eq!(tally.state(), TallyState::KeysGenerated);
        assert_eq!(tally.ciphertext(), &BigInt::from(1u8));

        let staged = tally.stage(true, &mut rng).unwrap();
        tally.commit(staged).unwrap();
        assert_eq!(tally.state(), TallyState::Tallying);
        assert_eq!(tally.count(), 1);

        assert_eq!(tally.decrypt(&authority).unwrap(), BigInt::from(1u8));
        assert_eq!(tally.state(), TallyState::Decrypted);

        match tally.decrypt(&authority) {
            Err(TallyError::AlreadyDecrypted) => (),
            _ => panic!("Expected AlreadyDecrypted error"),
        }
        match tally.stage(false, &mut rng) {
            Err(TallyError::AlreadyDecrypted) => (),
            _ => panic!("Expected AlreadyDecrypted error"),
        }
    }

    #[test]
    fn test_install_key_twice() {
        let authority = create_test_authority();
        let mut tally = Tally::with_public_key(authority.public_key().clone());
        match tally.install_key(authority.public_key().clone()) {
            Err(TallyError::WrongState(TallyState::KeysGenerated)) => (),
            _ => panic!("Expected WrongState error"),
        }
    }

    #[test]
    fn test_empty_tally_decrypts_to_zero() {
        let authority = create_test_authority();
        let mut tally = Tally::with_public_key(authority.public_key().clone());
        assert_eq!(tally.decrypt(&authority).unwrap(), BigInt::zero());
    }

    #[test]
    fn test_staging_does_not_mutate() {
        let authority = create_test_authority();
        let mut rng = StdRng::seed_from_u64(5);
        let mut tally = Tally::with_public_key(authority.public_key().clone());

        let _abandoned = tally.stage(true, &mut rng).unwrap();
        assert_eq!(tally.count(), 0);
        assert_eq!(tally.ciphertext(), &BigInt::from(1u8));

        let first = tally.stage(true, &mut rng).unwrap();
        let second = tally.stage(true, &mut rng).unwrap();
        tally.commit(first).unwrap();
        match tally.commit(second) {
            Err(TallyError::StaleStage) => (),
            _ => panic!("Expected StaleStage error"),
        }
        assert_eq!(tally.decrypt(&authority).unwrap(), BigInt::from(1u8));
    }

    #[test]
    fn test_many_votes() {
        let authority = create_test_authority();
        let mut rng = StdRng::seed_from_u64(6);
        let mut tally = Tally::with_public_key(authority.public_key().clone());
        let votes = [true, false, true, true, false, true, false];
        for vote in votes {
            let staged = tally.stage(vote, &mut rng).unwrap();
            tally.commit(staged).unwrap();
        }
        let yes = votes.iter().filter(|v| **v).count();
        assert_eq!(tally.decrypt(&authority).unwrap(), BigInt::from(yes));
    }

    #[test]
    fn test_key_mismatch() {
        let authority = create_test_authority();
        let other = PaillierKeyPair::new_fixed_key(&FixedParams {
            p: BigInt::from(1009u32),
            q: BigInt::from(1013u32),
        })
        .unwrap();
        let mut tally = Tally::with_public_key(authority.public_key().clone());
        match tally.decrypt(&other) {
            Err(TallyError::KeyMismatch) => (),
            _ => panic!("Expected KeyMismatch error"),
        }
        assert_eq!(tally.state(), TallyState::KeysGenerated);
    }
}
