//! Keeps the stored headers in step with the upstream node and publishes
//! the chain tip the read path resolves canonicity against.

use std::sync::Arc;

use anyhow::{anyhow, ensure};
use strata_chain_client::ChainClient;
use strata_common_types::{Fingerprint, Header};
use tracing::{debug, info, warn};

use crate::chain_store::ChainStore;
use crate::chain_tip::ChainTip;
use crate::config::HeaderSyncConfig;

/// How far a single sync steps back looking for a stored parent before
/// giving up.
pub const MAX_REORG_DEPTH: u64 = 128;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Headers written, including ones that were stored already.
    pub headers_written: usize,
    /// Times the sync stepped back because a parent wasn't stored.
    pub steps_back: u64,
}

#[derive(Debug)]
pub struct HeaderSync {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn ChainStore>,
    tip: ChainTip,
    fingerprint: Fingerprint,
    config: HeaderSyncConfig,
}

impl HeaderSync {
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn ChainStore>,
        tip: ChainTip,
        fingerprint: Fingerprint,
        config: HeaderSyncConfig,
    ) -> Self {
        Self {
            client,
            store,
            tip,
            fingerprint,
            config,
        }
    }

    /// Stores every header from the newest stored one up to the node's chain
    /// head, then publishes the highest stored header as the chain tip.
    ///
    /// The newest stored height is always fetched again, so that a reorg
    /// that doesn't grow the chain is noticed too.
    pub async fn sync(&self) -> anyhow::Result<SyncSummary> {
        let head = self.client.chain_head().await?;
        let starting_block = self.config.starting_block;
        if head.number < starting_block {
            debug!(
                head = %head.pointer(),
                starting_block,
                "Chain head is below the starting block"
            );
            return Ok(SyncSummary::default());
        }

        let latest = self.store.latest_header(&self.fingerprint).await?;
        let mut number = latest
            .map_or(starting_block, |header| header.block_number)
            .clamp(starting_block, head.number);

        let mut summary = SyncSummary::default();
        let mut last: Option<Header> = None;
        while number <= head.number {
            let header = self
                .client
                .header_by_number(number)
                .await?
                .ok_or_else(|| anyhow!("node has no header at block {number}"))?;

            if number > starting_block
                && self.store.header_by_hash(&header.parent_hash).await?.is_none()
            {
                ensure!(
                    summary.steps_back < MAX_REORG_DEPTH,
                    "no stored ancestor of block {} within {} blocks",
                    header.pointer(),
                    MAX_REORG_DEPTH
                );
                warn!(
                    block = %header.pointer(),
                    parent_hash = %header.parent_hash,
                    "Parent of header is not stored, assuming a reorg and stepping back"
                );
                summary.steps_back += 1;
                number -= 1;
                continue;
            }

            let stored = self
                .store
                .insert_header(&header, &self.fingerprint, true)
                .await?;
            if self.config.sync_receipts {
                let receipts = self.client.block_receipts(&header.hash).await?;
                debug!(
                    block = %header.pointer(),
                    receipts = receipts.len(),
                    "Storing receipts"
                );
                self.store.write_receipts(stored.id, receipts).await?;
            }

            summary.headers_written += 1;
            last = Some(stored);
            number += 1;
        }

        if let Some(last) = last {
            let version = self.tip.publish(last.pointer());
            info!(
                head = %last.pointer(),
                tip_version = version,
                headers_written = summary.headers_written,
                steps_back = summary.steps_back,
                "Synced headers"
            );
        }
        Ok(summary)
    }
}
