//! This crate implements anonymous, single-use voting credentials.
//!
//! An authority signs voting tokens with an RSA blind signature, so it never
//! learns which token belongs to which voter. Votes cast with those tokens are
//! encrypted under the Paillier cryptosystem and summed homomorphically; only
//! the final tally is ever decrypted.
//!
//! Based on:
//! [Chaum, 1983](https://link.springer.com/chapter/10.1007/978-1-4757-0602-4_18) for blind signatures and
//! [Paillier, 1999](https://link.springer.com/chapter/10.1007/3-540-48910-X_16) for the additively homomorphic tally.
//!
//! # Example
//! ```no_run
//! use blind_ballot::{Ballot, ElectionConfig, MemLedger, Roster, VotingProtocol};
//! use std::time::Instant;
//!
//! let roster: Roster = vec![("00A00000", "1234")].into_iter().collect();
//! let config = ElectionConfig::default();
//! let now = Instant::now();
//! let mut protocol = VotingProtocol::setup(&config, roster, MemLedger::new(), now)?;
//!
//! let credential = protocol.register("00A00000", "1234", now)?;
//! protocol.cast_vote(&Ballot::new(credential.to_fields(), "1"), now)?;
//! assert_eq!(protocol.outcome().map(|o| o.yes), Some(1));
//! # Ok::<(), blind_ballot::Error>(())
//! ```

pub mod blind;
pub mod config;
pub mod election;
pub mod error;
pub mod functions;
pub mod keygen;
pub mod ledger;
pub mod priv_key;
pub mod protocol;
pub mod pub_key;
pub mod roster;
pub mod tally;
pub mod token;

pub use blind::{Credential, CredentialFields, CredentialRequest, RsaKeyPair, RsaPublicKey};
pub use config::ElectionConfig;
pub use election::{ElectionState, Event, Phase};
pub use error::Error;
pub use keygen::{FixedParams, KeySize, PaillierKeyPair};
pub use ledger::{FileLedger, MemLedger, TokenStore};
pub use protocol::{Ballot, ElectionOutcome, VoteReceipt, VotingProtocol};
pub use pub_key::PublicKey;
pub use roster::{IdentityVerifier, Roster};
pub use tally::{Tally, TallyAuthority};
pub use token::Token;
