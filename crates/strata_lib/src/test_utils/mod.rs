pub mod mocks;

use std::env;

use once_cell::sync::Lazy;
use prometheus_exporter::prometheus::{IntCounterVec, Opts};
use rand::rngs::{OsRng, SmallRng};
use rand::{RngCore, SeedableRng};
use strata_common_types::{
    Address, BlockHash, ChainHeader, Fingerprint, Header, HeaderId, HexString, RawLog, Topic,
};

pub static TEST_SEED: Lazy<u64> = Lazy::new(|| {
    let seed = env::var("TEST_SEED")
        .map(|seed| seed.parse().expect("Invalid TEST_SEED value"))
        .unwrap_or(OsRng.next_u64());

    println!("------------------------------------------------------------------------");
    println!("TEST_SEED={}", seed);
    println!("  This value can be changed via the environment variable TEST_SEED.");
    println!("------------------------------------------------------------------------");

    seed
});

pub fn fast_rng(seed_extra: u64) -> SmallRng {
    SmallRng::seed_from_u64(*TEST_SEED + seed_extra)
}

/// A counter vector that isn't registered anywhere, so tests don't share
/// counts through the global registry.
pub fn test_counter_vec(labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new("test_counter", "Unregistered test counter"), labels).unwrap()
}

pub fn fingerprint() -> Fingerprint {
    Fingerprint::new("testnet")
}

/// A distinct hash for every `(number, fork)` pair.
pub fn hash(number: u64, fork: u8) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[0] = fork;
    bytes[24..].copy_from_slice(&number.to_be_bytes());
    HexString(bytes)
}

/// A chain of headers `0..len` on `fork`, branching off the main chain
/// (fork `0`) at `branch_at`.
pub fn chain(len: u64, fork: u8, branch_at: u64) -> Vec<ChainHeader> {
    let fork_of = |n: u64| if n >= branch_at { fork } else { 0 };
    (0..len)
        .map(|number| ChainHeader {
            number,
            hash: hash(number, fork_of(number)),
            parent_hash: hash(number.saturating_sub(1), fork_of(number.saturating_sub(1))),
        })
        .collect()
}

/// `header` as if it had been stored under `id`.
pub fn stored(header: &ChainHeader, id: HeaderId) -> Header {
    Header {
        id,
        block_number: header.number,
        hash: header.hash,
        parent_hash: header.parent_hash,
        fingerprint: fingerprint(),
        canonical: true,
    }
}

/// Null-padded text in a `bytes32` topic.
pub fn text_topic(text: &str) -> Topic {
    let mut bytes = [0u8; 32];
    bytes[..text.len()].copy_from_slice(text.as_bytes());
    HexString(bytes)
}

/// A log of `header` with `signature` as its only topic and an empty
/// payload.
pub fn raw_log(
    header: &ChainHeader,
    address: Address,
    signature: Topic,
    transaction_index: u32,
    log_index: u32,
) -> RawLog {
    RawLog {
        address,
        topics: vec![signature],
        data: HexString(vec![]),
        block_number: header.number,
        block_hash: header.hash,
        transaction_hash: tx_hash(header, transaction_index),
        transaction_index,
        log_index,
        removed: false,
    }
}

pub fn tx_hash(header: &ChainHeader, transaction_index: u32) -> BlockHash {
    let mut bytes = header.hash.0;
    bytes[1] = 0xff;
    bytes[2..6].copy_from_slice(&transaction_index.to_be_bytes());
    HexString(bytes)
}
