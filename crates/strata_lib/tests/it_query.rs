use std::sync::Arc;

use rand::seq::SliceRandom;
use strata_common_types::{Address, ChainHeader, HexString, Receipt};
use strata_lib::canonicity::Canonicity;
use strata_lib::chain_tip::ChainTip;
use strata_lib::config::{HeaderSyncConfig, QueryConfig};
use strata_lib::header_sync::HeaderSync;
use strata_lib::query::QueryBackend;
use strata_lib::test_utils::mocks::{MockChainClient, MockStore};
use strata_lib::test_utils::{chain, fast_rng, fingerprint, raw_log, test_counter_vec, tx_hash};

const A: Address = HexString([0xaa; 20]);
const B: Address = HexString([0xbb; 20]);

/// Three transactions with two logs each, alternating between contracts A
/// and B. The second transaction reverted.
fn receipts(block: &ChainHeader) -> Vec<Receipt> {
    let emitters = [[A, B], [B, A], [A, B]];
    emitters
        .iter()
        .enumerate()
        .map(|(tx, addresses)| {
            let tx = tx as u32;
            Receipt {
                transaction_hash: tx_hash(block, tx),
                transaction_index: tx,
                status: if tx == 1 { 0 } else { 1 },
                logs: addresses
                    .iter()
                    .enumerate()
                    .map(|(i, address)| {
                        raw_log(block, *address, HexString([0x10; 32]), tx, tx * 2 + i as u32)
                    })
                    .collect(),
            }
        })
        .collect()
}

#[tokio::test]
async fn logs_of_a_synced_block() {
    //// Given
    let client = Arc::new(MockChainClient::default());
    let store = Arc::new(MockStore::default());
    let tip = ChainTip::new();
    let blocks = chain(3, 0, 0);
    client.set_chain(&blocks);

    let mut shuffled = receipts(&blocks[2]);
    shuffled.shuffle(&mut fast_rng(0));
    client.add_receipts(blocks[2].hash, shuffled);

    let sync = HeaderSync::new(
        client.clone(),
        store.clone(),
        tip.clone(),
        fingerprint(),
        HeaderSyncConfig {
            starting_block: 0,
            sync_receipts: true,
        },
    );
    sync.sync().await.unwrap();

    let backend = QueryBackend::new(
        store.clone(),
        tip,
        &QueryConfig::default(),
        test_counter_vec(&["outcome"]),
    );

    //// When
    let all = backend.get_logs(&blocks[2].hash, None).await.unwrap();
    let from_a = backend.get_logs(&blocks[2].hash, Some(&A)).await.unwrap();

    //// Then
    let positions: Vec<(u32, u32)> = all
        .iter()
        .map(|log| (log.transaction_index, log.log_index))
        .collect();
    assert_eq!(
        positions,
        vec![(0, 0), (0, 1), (1, 2), (1, 3), (2, 4), (2, 5)]
    );

    let a_logs: Vec<(u32, u8)> = from_a
        .iter()
        .map(|log| (log.log_index, log.receipt_status))
        .collect();
    assert_eq!(a_logs, vec![(0, 1), (3, 0), (4, 1)]);
    assert!(from_a.iter().all(|log| log.address == A));

    let empty_block = backend.get_logs(&blocks[1].hash, None).await.unwrap();
    assert!(empty_block.is_empty());
}

#[tokio::test]
async fn logs_and_canonicity_after_reorg() {
    //// Given
    let client = Arc::new(MockChainClient::default());
    let store = Arc::new(MockStore::default());
    let tip = ChainTip::new();
    let main = chain(4, 0, 0);
    let fork = chain(5, 1, 2);
    client.set_chain(&main);
    client.add_receipts(main[3].hash, receipts(&main[3]));

    let sync = HeaderSync::new(
        client.clone(),
        store.clone(),
        tip.clone(),
        fingerprint(),
        HeaderSyncConfig {
            starting_block: 0,
            sync_receipts: true,
        },
    );
    sync.sync().await.unwrap();

    //// When
    client.set_chain(&fork);
    sync.sync().await.unwrap();
    let backend = QueryBackend::new(
        store.clone(),
        tip,
        &QueryConfig::default(),
        test_counter_vec(&["outcome"]),
    );

    //// Then
    // The orphaned block keeps its logs.
    let orphaned = backend.get_logs(&main[3].hash, Some(&B)).await.unwrap();
    assert_eq!(orphaned.len(), 3);
    assert_eq!(
        backend.block_canonicity(&main[3].hash).await.unwrap(),
        Canonicity::NonCanonical
    );
    assert_eq!(
        backend.block_canonicity(&fork[3].hash).await.unwrap(),
        Canonicity::Canonical
    );
}
