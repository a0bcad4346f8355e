use blind_ballot::error::Error;
use blind_ballot::ledger::LedgerError;
use blind_ballot::priv_key::PrivKeyError;
use blind_ballot::{
    Ballot, CredentialRequest, ElectionConfig, FileLedger, FixedParams, MemLedger,
    PaillierKeyPair, Phase, PublicKey, Roster, RsaKeyPair, TallyAuthority, Token, TokenStore,
    VotingProtocol,
};
use num_bigint::BigInt;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const HOUR: Duration = Duration::from_secs(3600);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn election_config() -> ElectionConfig {
    ElectionConfig {
        election_id: "TEST".to_string(),
        rsa_bits: 512,
        registration_window: HOUR,
        voting_window: HOUR,
        ..ElectionConfig::default()
    }
}

fn demo_authority() -> PaillierKeyPair {
    PaillierKeyPair::new_fixed_key(&FixedParams {
        p: BigInt::from(65521u32),
        q: BigInt::from(65519u32),
    })
    .expect("paillier keygen failed")
}

fn two_voters() -> Roster {
    vec![("00A00000", "1111"), ("00B00000", "2222")]
        .into_iter()
        .collect()
}

fn create_protocol<S: TokenStore, A: TallyAuthority>(
    ledger: S,
    authority: A,
    now: Instant,
) -> VotingProtocol<S, Roster, A> {
    let config = election_config();
    let signing_key = RsaKeyPair::generate(config.rsa_bits).expect("RSA keygen failed");
    VotingProtocol::new(&config, signing_key, two_voters(), ledger, authority, now)
        .expect("protocol setup failed")
}

/// Records every ciphertext it is asked to decrypt.
struct CountingAuthority {
    inner: PaillierKeyPair,
    decrypted: RefCell<Vec<BigInt>>,
}

impl TallyAuthority for CountingAuthority {
    fn public_key(&self) -> &PublicKey {
        self.inner.public_key()
    }

    fn decrypt_tally(&self, tally: &BigInt) -> Result<BigInt, PrivKeyError> {
        self.decrypted.borrow_mut().push(tally.clone());
        self.inner.decrypt_tally(tally)
    }
}

/// In-memory store whose next insert or removal can be made to fail.
#[derive(Default)]
struct FlakyLedger {
    inner: MemLedger,
    fail_next_register: bool,
    fail_next_consume: bool,
}

impl TokenStore for FlakyLedger {
    fn register_token(&mut self, token_hex: &str) -> Result<(), LedgerError> {
        if std::mem::take(&mut self.fail_next_register) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full").into());
        }
        self.inner.register_token(token_hex)
    }

    fn exists(&self, token_hex: &str) -> Result<bool, LedgerError> {
        self.inner.exists(token_hex)
    }

    fn consume_once(&mut self, token_hex: &str) -> Result<(), LedgerError> {
        if std::mem::take(&mut self.fail_next_consume) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full").into());
        }
        self.inner.consume_once(token_hex)
    }

    fn len(&self) -> Result<usize, LedgerError> {
        self.inner.len()
    }
}

fn temp_ledger_path() -> PathBuf {
    let mut tag = [0u8; 8];
    OsRng.fill_bytes(&mut tag);
    std::env::temp_dir().join(format!("blind-ballot-it-{}.ledger", hex::encode(tag)))
}

#[test]
fn test_zero_nonce_token_votes_once() {
    init_logger();
    let start = Instant::now();
    let mut protocol = create_protocol(MemLedger::new(), demo_authority(), start);

    let t1 = Token::from_nonce("TEST", [0u8; 16]);
    let mut preimage = b"TEST".to_vec();
    preimage.extend_from_slice(&[0u8; 16]);
    let expected_hex = hex::encode(Sha256::digest(&preimage));
    assert_eq!(t1.hex(), expected_hex);

    let request = CredentialRequest::new(t1, protocol.signing_key()).unwrap();
    let first = protocol
        .register_request("00A00000", "1111", request, start)
        .unwrap();
    assert!(protocol.ledger().exists(&expected_hex).unwrap());
    let second = protocol.register("00B00000", "2222", start).unwrap();
    assert_eq!(protocol.phase(), Phase::Voting);

    let ballot = Ballot::new(first.to_fields(), "1");
    protocol.cast_vote(&ballot, start).unwrap();
    assert!(!protocol.ledger().exists(&expected_hex).unwrap());

    let tally_after_first = protocol.tally_ciphertext().clone();
    match protocol.cast_vote(&ballot, start) {
        Err(Error::TokenNotFound) => (),
        other => panic!("Expected TokenNotFound, got {:?}", other),
    }
    assert_eq!(protocol.tally_ciphertext(), &tally_after_first);

    protocol
        .cast_vote(&Ballot::new(second.to_fields(), "0"), start)
        .unwrap();
    assert_eq!(protocol.phase(), Phase::Closed);
    let outcome = protocol.outcome().expect("election should be decided");
    assert_eq!(outcome.yes, 1);
    assert_eq!(outcome.no, 1);
    assert_eq!(outcome.cast, 2);
}

#[test]
fn test_full_roster_opens_voting_before_deadline() {
    init_logger();
    let start = Instant::now();
    let mut protocol = create_protocol(MemLedger::new(), demo_authority(), start);

    protocol.register("00A00000", "1111", start).unwrap();
    assert_eq!(protocol.phase(), Phase::Registering);
    let one_minute_in = start + Duration::from_secs(60);
    protocol.register("00B00000", "2222", one_minute_in).unwrap();
    assert_eq!(protocol.phase(), Phase::Voting);
    assert_eq!(protocol.state().phase_started(), one_minute_in);
}

#[test]
fn test_tally_decrypted_exactly_once() {
    init_logger();
    let start = Instant::now();
    let authority = CountingAuthority {
        inner: demo_authority(),
        decrypted: RefCell::new(Vec::new()),
    };
    let mut protocol = create_protocol(MemLedger::new(), authority, start);

    let alice = protocol.register("00A00000", "1111", start).unwrap();
    let bob = protocol.register("00B00000", "2222", start).unwrap();
    let r1 = protocol
        .cast_vote(&Ballot::new(alice.to_fields(), "1"), start)
        .unwrap();
    assert!(protocol.authority().decrypted.borrow().is_empty());
    let r2 = protocol
        .cast_vote(&Ballot::new(bob.to_fields(), "1"), start)
        .unwrap();

    // Further ticks after closing must not decrypt again
    protocol.tick(start + 3 * HOUR).unwrap();

    let decrypted = protocol.authority().decrypted.borrow();
    assert_eq!(decrypted.len(), 1);
    assert_eq!(&decrypted[0], protocol.tally_ciphertext());
    assert_ne!(decrypted[0], r1.ciphertext);
    assert_ne!(decrypted[0], r2.ciphertext);
    assert_eq!(protocol.outcome().map(|o| o.yes), Some(2));
}

#[test]
fn test_storage_failure_does_not_count_vote() {
    init_logger();
    let start = Instant::now();
    let mut protocol = create_protocol(FlakyLedger::default(), demo_authority(), start);
    let alice = protocol.register("00A00000", "1111", start).unwrap();
    protocol.register("00B00000", "2222", start).unwrap();

    let tally_before = protocol.tally_ciphertext().clone();
    let ballot = Ballot::new(alice.to_fields(), "1");
    protocol.ledger_mut().fail_next_consume = true;
    match protocol.cast_vote(&ballot, start) {
        Err(err @ Error::StorageFailure(_)) => assert!(!err.is_fatal()),
        other => panic!("Expected StorageFailure, got {:?}", other),
    }
    assert_eq!(protocol.tally_ciphertext(), &tally_before);
    assert_eq!(protocol.state().cast(), 0);
    assert!(protocol.ledger().exists(&alice.token.hex()).unwrap());

    let receipt = protocol.cast_vote(&ballot, start).unwrap();
    assert_eq!(receipt.cast, 1);
}

#[test]
fn test_storage_failure_returns_issuance_slot() {
    init_logger();
    let start = Instant::now();
    let config = ElectionConfig {
        issuance_quota: Some(2),
        ..election_config()
    };
    let signing_key = RsaKeyPair::generate(config.rsa_bits).unwrap();
    let mut protocol = VotingProtocol::new(
        &config,
        signing_key,
        two_voters(),
        FlakyLedger::default(),
        demo_authority(),
        start,
    )
    .unwrap();

    protocol.ledger_mut().fail_next_register = true;
    match protocol.register("00A00000", "1111", start) {
        Err(err @ Error::StorageFailure(_)) => assert!(!err.is_fatal()),
        other => panic!("Expected StorageFailure, got {:?}", other.map(|_| ())),
    }
    assert_eq!(protocol.state().issued(), 0);
    assert!(protocol.ledger().is_empty().unwrap());

    // Both voters still fit in the quota of two
    protocol.register("00A00000", "1111", start).unwrap();
    protocol.register("00B00000", "2222", start).unwrap();
    assert_eq!(protocol.state().issued(), 2);
    assert_eq!(protocol.ledger().len().unwrap(), 2);
    assert_eq!(protocol.phase(), Phase::Voting);
}

#[test]
fn test_file_ledger_election() {
    init_logger();
    let path = temp_ledger_path();
    let start = Instant::now();
    let ledger = FileLedger::open(&path).unwrap();
    let mut protocol = create_protocol(ledger, demo_authority(), start);

    let alice = protocol.register("00A00000", "1111", start).unwrap();
    let bob = protocol.register("00B00000", "2222", start).unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        contents,
        format!("{}\n{}\n", alice.token.hex(), bob.token.hex())
    );

    protocol
        .cast_vote(&Ballot::new(bob.to_fields(), "1"), start)
        .unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, format!("{}\n", alice.token.hex()));

    let before = std::fs::read(&path).unwrap();
    match protocol.cast_vote(&Ballot::new(bob.to_fields(), "1"), start) {
        Err(Error::TokenNotFound) => (),
        other => panic!("Expected TokenNotFound, got {:?}", other),
    }
    assert_eq!(std::fs::read(&path).unwrap(), before);

    // The voting deadline closes the election with alice's token unspent
    let voting_started = protocol.state().phase_started();
    assert_eq!(protocol.tick(voting_started + HOUR).unwrap(), Phase::Closed);
    let outcome = protocol.outcome().unwrap();
    assert_eq!((outcome.yes, outcome.no, outcome.cast), (1, 0, 1));

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_setup_with_demo_keys() {
    init_logger();
    let config = ElectionConfig {
        paillier_key_size: blind_ballot::KeySize::Demo,
        ..election_config()
    };
    let start = Instant::now();
    let mut protocol =
        VotingProtocol::setup(&config, two_voters(), MemLedger::new(), start).unwrap();
    assert!(protocol.tally_key().n < BigInt::from(1u64 << 32));

    let alice = protocol.register("00A00000", "1111", start).unwrap();
    let bob = protocol.register("00B00000", "2222", start).unwrap();
    protocol
        .cast_vote(&Ballot::new(alice.to_fields(), "0"), start)
        .unwrap();
    protocol
        .cast_vote(&Ballot::new(bob.to_fields(), "1"), start)
        .unwrap();
    assert_eq!(protocol.outcome().map(|o| (o.yes, o.no)), Some((1, 1)));
}
