use num_bigint::BigInt;
use num_traits::ToPrimitive;
use rand::rngs::OsRng;
use std::collections::BTreeSet;
use std::time::Instant;

use crate::blind::{
    BlindSignature, BlindSigner, BlindedMessage, Credential, CredentialFields, CredentialRequest,
    RsaKeyPair, RsaPublicKey,
};
use crate::config::{ConfigError, ElectionConfig, MIN_RSA_BITS};
use crate::election::{ElectionState, Event, Phase, Transition};
use crate::error::Error;
use crate::functions::{check_entropy, FunctionError};
use crate::keygen::PaillierKeyPair;
use crate::ledger::TokenStore;
use crate::pub_key::PublicKey;
use crate::roster::{AuthError, IdentityVerifier};
use crate::tally::{Tally, TallyAuthority};
use crate::token::{parse_hex_integer, parse_token, parse_vote, Token};

/// The fields a voter submits: their credential in hex plus the vote bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub nonce: String,
    pub token: String,
    pub signature: String,
    pub vote: String,
}

impl Ballot {
    pub fn new(fields: CredentialFields, vote: &str) -> Self {
        Ballot {
            nonce: fields.nonce,
            token: fields.token,
            signature: fields.signature,
            vote: vote.to_string(),
        }
    }
}

/// Returned for every accepted vote. The ciphertexts of all receipts
/// multiply to the final tally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub ciphertext: BigInt,
    /// Votes accepted so far, this one included.
    pub cast: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionOutcome {
    pub yes: u64,
    pub no: u64,
    pub cast: u64,
}

/// Drives one election through registration, voting and the tally
/// decryption. Every request takes `&mut self`; wrap the protocol in a
/// `Mutex` to serve concurrent clients.
pub struct VotingProtocol<S, V, A>
where
    S: TokenStore,
    V: IdentityVerifier,
    A: TallyAuthority,
{
    election_id: String,
    state: ElectionState,
    signer: BlindSigner,
    verifier: V,
    ledger: S,
    authority: A,
    tally: Tally,
    issued_identities: BTreeSet<String>,
    outcome: Option<ElectionOutcome>,
}

impl<S, V> VotingProtocol<S, V, PaillierKeyPair>
where
    S: TokenStore,
    V: IdentityVerifier,
{
    /// Checks the entropy source, then generates both key pairs and opens
    /// registration at `now`.
    pub fn setup(config: &ElectionConfig, verifier: V, ledger: S, now: Instant) -> Result<Self, Error> {
        config.validate()?;
        check_entropy()?;
        log::info!(
            "generating keys for election {:?} (RSA {} bits, paillier {:?})",
            config.election_id,
            config.rsa_bits,
            config.paillier_key_size
        );
        let signing_key = RsaKeyPair::generate(config.rsa_bits)?;
        let authority = PaillierKeyPair::new(config.paillier_key_size)?;
        Self::new(config, signing_key, verifier, ledger, authority, now)
    }
}

impl<S, V, A> VotingProtocol<S, V, A>
where
    S: TokenStore,
    V: IdentityVerifier,
    A: TallyAuthority,
{
    pub fn new(
        config: &ElectionConfig,
        signing_key: RsaKeyPair,
        verifier: V,
        ledger: S,
        authority: A,
        now: Instant,
    ) -> Result<Self, Error> {
        config.validate()?;
        let rsa_bits = signing_key.public_key().n.bits();
        if rsa_bits < MIN_RSA_BITS {
            return Err(ConfigError::RsaTooSmall(rsa_bits as usize).into());
        }
        let tally = Tally::with_public_key(authority.public_key().clone());
        let state = ElectionState::new(
            verifier.eligible_count(),
            config.registration_window,
            config.voting_window,
            now,
        );
        let mut protocol = VotingProtocol {
            election_id: config.election_id.clone(),
            state,
            signer: BlindSigner::new(signing_key, config.issuance_quota),
            verifier,
            ledger,
            authority,
            tally,
            issued_identities: BTreeSet::new(),
            outcome: None,
        };
        log::info!(
            "registration open for {} eligible identities",
            protocol.verifier.eligible_count()
        );
        // An empty roster closes the election straight away
        protocol.advance(now)?;
        Ok(protocol)
    }

    pub fn election_id(&self) -> &str {
        &self.election_id
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn state(&self) -> &ElectionState {
        &self.state
    }

    /// The key voters verify their credentials against.
    pub fn signing_key(&self) -> &RsaPublicKey {
        self.signer.public_key()
    }

    /// The key votes are encrypted under.
    pub fn tally_key(&self) -> &PublicKey {
        self.authority.public_key()
    }

    /// The current encrypted tally. Safe to publish at any point.
    pub fn tally_ciphertext(&self) -> &BigInt {
        self.tally.ciphertext()
    }

    pub fn ledger(&self) -> &S {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut S {
        &mut self.ledger
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    /// Set once the election has closed and the tally was decrypted.
    pub fn outcome(&self) -> Option<ElectionOutcome> {
        self.outcome
    }

    /// Re-evaluates deadlines without any request and retries a tally
    /// decryption that failed earlier. Returns the phase after polling.
    pub fn tick(&mut self, now: Instant) -> Result<Phase, Error> {
        self.advance(now)?;
        self.state.admit(Event::Tick)?;
        Ok(self.phase())
    }

    /// Registers `identity` end to end: a fresh token is created, blinded,
    /// signed, unblinded and added to the ledger.
    pub fn register(&mut self, identity: &str, code: &str, now: Instant) -> Result<Credential, Error> {
        let token = Token::generate(&self.election_id)
            .map_err(|_| Error::Randomness(FunctionError::RandomNumberGeneration))?;
        let request = CredentialRequest::new(token, self.signer.public_key())?;
        self.register_request(identity, code, request, now)
    }

    /// Registers `identity` with a request the voter blinded themselves.
    pub fn register_request(
        &mut self,
        identity: &str,
        code: &str,
        request: CredentialRequest,
        now: Instant,
    ) -> Result<Credential, Error> {
        match self.try_register(identity, code, request, now) {
            Ok(credential) => {
                log::info!(
                    "issued token {} of {}",
                    self.state.issued(),
                    self.verifier.eligible_count()
                );
                Ok(credential)
            }
            Err(err) => {
                log::warn!("registration rejected: {}", err);
                Err(err)
            }
        }
    }

    fn try_register(
        &mut self,
        identity: &str,
        code: &str,
        request: CredentialRequest,
        now: Instant,
    ) -> Result<Credential, Error> {
        self.advance(now)?;
        self.state.admit(Event::RegisterRequest)?;

        self.verifier.verify(identity, code)?;
        if self.issued_identities.contains(identity) {
            return Err(AuthError::AlreadyIssued.into());
        }

        let blind_signature = self.issue(request.blinded())?;
        let credential = match self.store_credential(request, &blind_signature) {
            Ok(credential) => credential,
            Err(err) => {
                // Nothing was stored, so the quota slot goes back
                self.signer.release();
                return Err(err);
            }
        };

        self.issued_identities.insert(identity.to_string());
        let transitions = self.state.record_registration(now);
        self.log_transitions(&transitions);
        self.settle_after_commit();
        Ok(credential)
    }

    /// The authority only ever sees the blinded value.
    fn issue(&mut self, blinded: &BlindedMessage) -> Result<BlindSignature, Error> {
        Ok(self.signer.sign(blinded)?)
    }

    fn store_credential(
        &mut self,
        request: CredentialRequest,
        blind_signature: &BlindSignature,
    ) -> Result<Credential, Error> {
        let credential = request.finish(blind_signature, self.signer.public_key())?;
        self.ledger.register_token(&credential.token.hex())?;
        Ok(credential)
    }

    /// Accepts one vote. On any error the ledger and the tally are exactly
    /// as they were before the call. Once the vote is committed the receipt
    /// is returned even if closing the election fails; [`Self::tick`]
    /// retries the close and reports its error.
    pub fn cast_vote(&mut self, ballot: &Ballot, now: Instant) -> Result<VoteReceipt, Error> {
        match self.try_cast_vote(ballot, now) {
            Ok(receipt) => {
                log::info!("accepted vote {} of {}", receipt.cast, self.state.vote_quota());
                Ok(receipt)
            }
            Err(err) => {
                log::warn!("vote rejected: {}", err);
                Err(err)
            }
        }
    }

    fn try_cast_vote(&mut self, ballot: &Ballot, now: Instant) -> Result<VoteReceipt, Error> {
        self.advance(now)?;
        self.state.admit(Event::VoteRequest)?;

        let token = parse_token(&self.election_id, &ballot.nonce, &ballot.token)?;
        let signature = parse_hex_integer(&ballot.signature)?;
        let token_hex = token.hex();
        if !self.ledger.exists(&token_hex)? {
            return Err(Error::TokenNotFound);
        }
        self.signer.public_key().verify_token(&token, &signature)?;
        let vote = parse_vote(&ballot.vote)?;

        // The new tally is computed first but only committed once the
        // ledger removal is confirmed.
        let staged = self.tally.stage(vote, &mut OsRng)?;
        self.ledger.consume_once(&token_hex)?;
        let ciphertext = staged.ciphertext().clone();
        self.tally.commit(staged)?;

        let transitions = self.state.record_vote(now);
        self.log_transitions(&transitions);
        let receipt = VoteReceipt {
            ciphertext,
            cast: self.state.cast(),
        };
        self.settle_after_commit();
        Ok(receipt)
    }

    /// Applies every due transition, then decrypts if the election is
    /// closed and still undecided.
    fn advance(&mut self, now: Instant) -> Result<(), Error> {
        let transitions = self.state.poll_all(now);
        self.log_transitions(&transitions);
        self.settle()
    }

    fn settle(&mut self) -> Result<(), Error> {
        if self.state.phase() == Phase::Closed {
            self.close_tally()?;
        }
        Ok(())
    }

    fn settle_after_commit(&mut self) {
        if let Err(err) = self.settle() {
            log::error!("closing the election failed, retried on next tick: {}", err);
        }
    }

    fn log_transitions(&self, transitions: &[Transition]) {
        for transition in transitions {
            log::info!(
                "election moved from {:?} to {:?} ({:?})",
                transition.from,
                transition.to,
                transition.reason
            );
        }
    }

    /// Decrypts the aggregate. Runs at most once per election.
    fn close_tally(&mut self) -> Result<(), Error> {
        if self.outcome.is_some() {
            return Ok(());
        }
        let yes = self.tally.decrypt(&self.authority)?;
        let cast = self.tally.count();
        let yes = yes
            .to_u64()
            .filter(|yes| *yes <= cast)
            .ok_or_else(|| {
                Error::InvariantViolation(format!("tally of {} exceeds {} votes cast", yes, cast))
            })?;
        let outcome = ElectionOutcome {
            yes,
            no: cast - yes,
            cast,
        };
        log::info!(
            "tally decrypted: {} yes, {} no, {} cast",
            outcome.yes,
            outcome.no,
            outcome.cast
        );
        self.outcome = Some(outcome);
        Ok(())
    }
}
