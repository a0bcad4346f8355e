use blind_ballot::blind::{BlindSigner, CredentialRequest, RsaKeyPair};
use blind_ballot::{FixedParams, PaillierKeyPair, Tally, Token};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use num_bigint::BigInt;
use rand::rngs::OsRng;

fn bench_blind_issuance(c: &mut Criterion) {
    let key_pair = RsaKeyPair::generate(1024).unwrap();
    let public = key_pair.public_key().clone();
    let mut signer = BlindSigner::new(key_pair, None);

    c.bench_function("blind issuance (RSA 1024)", |b| {
        b.iter(|| {
            let token = Token::generate("BENCH").unwrap();
            let request = CredentialRequest::new(token, &public).unwrap();
            let answer = signer.sign(request.blinded()).unwrap();
            black_box(request.finish(&answer, &public).unwrap())
        })
    });
}

fn bench_vote_aggregation(c: &mut Criterion) {
    let key_pair = PaillierKeyPair::new_fixed_key(&FixedParams {
        p: BigInt::from(65521u32),
        q: BigInt::from(65519u32),
    })
    .unwrap();
    let mut tally = Tally::with_public_key(key_pair.public_key().clone());

    c.bench_function("encrypt and fold one vote", |b| {
        b.iter(|| {
            let staged = tally.stage(black_box(true), &mut OsRng).unwrap();
            tally.commit(staged).unwrap();
        })
    });
}

criterion_group!(benches, bench_blind_issuance, bench_vote_aggregation);
criterion_main!(benches);
