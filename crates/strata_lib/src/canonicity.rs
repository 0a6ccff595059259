//! Decides whether a stored header is an ancestor of the current chain tip.
//!
//! The decision is made by [`resolve`], a pure function of the tip snapshot,
//! the target header and the stored headers between the two. The
//! [`CanonicityResolver`] only gathers those inputs.

use std::sync::Arc;

use strata_common_types::{BlockHash, BlockPointer, Header};
use thiserror::Error;
use tracing::trace;

use crate::chain_store::ChainStore;
use crate::chain_tip::{ChainTip, TipSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Canonicity {
    Canonical,
    NonCanonical,
}

#[derive(Debug, Error)]
pub enum CanonicityError {
    /// Stored headers don't connect the tip to the target's height, so the
    /// answer isn't known. Not the same as non-canonical.
    #[error("ancestry of tip {tip} is unknown below block {reached}, target is {target}")]
    UnknownAncestry {
        target: BlockPointer,
        tip: BlockPointer,
        reached: u64,
    },
    #[error("block {target} is ahead of the chain tip {tip}")]
    AheadOfTip {
        target: BlockPointer,
        tip: BlockPointer,
    },
    #[error("no chain head has been observed yet")]
    NoChainHead,
    #[error("block {0} is not stored")]
    UnknownHeader(BlockHash),
    #[error(transparent)]
    Store(anyhow::Error),
}

/// Compares `target` with the header at the same height on `ancestry`, the
/// stored headers reached by walking parent links down from the tip of
/// `tip`, tip first.
pub fn resolve(
    tip: &TipSnapshot,
    target: &Header,
    ancestry: &[Header],
) -> Result<Canonicity, CanonicityError> {
    if target.block_number > tip.head.number {
        return Err(CanonicityError::AheadOfTip {
            target: target.pointer(),
            tip: tip.head.clone(),
        });
    }

    let unknown = |reached: u64| CanonicityError::UnknownAncestry {
        target: target.pointer(),
        tip: tip.head.clone(),
        reached,
    };

    match ancestry.first() {
        Some(first) if first.hash == tip.head.hash => {}
        // The tip itself isn't stored.
        _ => return Err(unknown(tip.head.number)),
    }

    match ancestry
        .iter()
        .find(|header| header.block_number == target.block_number)
    {
        Some(header) if header.hash == target.hash => Ok(Canonicity::Canonical),
        Some(_) => Ok(Canonicity::NonCanonical),
        None => Err(unknown(
            ancestry
                .last()
                .map_or(tip.head.number, |header| header.block_number),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct CanonicityResolver {
    store: Arc<dyn ChainStore>,
    tip: ChainTip,
}

impl CanonicityResolver {
    pub fn new(store: Arc<dyn ChainStore>, tip: ChainTip) -> Self {
        Self { store, tip }
    }

    pub async fn is_canonical(&self, hash: &BlockHash) -> Result<bool, CanonicityError> {
        Ok(self.canonicity(hash).await? == Canonicity::Canonical)
    }

    /// Walks from the current tip down to the target's height. The cost is
    /// proportional to the distance between the two.
    pub async fn canonicity(&self, hash: &BlockHash) -> Result<Canonicity, CanonicityError> {
        let target = self
            .store
            .header_by_hash(hash)
            .await
            .map_err(CanonicityError::Store)?
            .ok_or(CanonicityError::UnknownHeader(*hash))?;
        let tip = self.tip.snapshot().ok_or(CanonicityError::NoChainHead)?;

        if target.block_number > tip.head.number {
            return resolve(&tip, &target, &[]);
        }

        let distance = tip.head.number - target.block_number;
        let ancestry = self
            .store
            .ancestry(&tip.head.hash, target.block_number, distance + 1)
            .await
            .map_err(CanonicityError::Store)?;

        trace!(
            target = %target.pointer(),
            tip = %tip.head,
            tip_version = tip.version,
            walked = ancestry.len(),
            "Resolving canonicity"
        );
        resolve(&tip, &target, &ancestry)
    }
}

#[cfg(test)]
mod tests {
    use strata_common_types::Fingerprint;

    use super::*;
    use crate::test_utils::mocks::MockStore;
    use crate::test_utils::{chain, hash};

    fn header(number: u64, fork: u8) -> Header {
        Header {
            id: number as i64,
            block_number: number,
            hash: hash(number, fork),
            parent_hash: hash(number.saturating_sub(1), 0),
            fingerprint: Fingerprint::new("test"),
            canonical: fork == 0,
        }
    }

    fn tip_at(number: u64) -> TipSnapshot {
        TipSnapshot {
            version: 1,
            head: header(number, 0).pointer(),
        }
    }

    fn walk(from: u64, down_to: u64) -> Vec<Header> {
        (down_to..=from).rev().map(|n| header(n, 0)).collect()
    }

    #[test]
    fn exact_match_is_canonical() {
        let result = resolve(&tip_at(10), &header(7, 0), &walk(10, 7));
        assert_eq!(result.unwrap(), Canonicity::Canonical);
    }

    #[test]
    fn sibling_is_non_canonical() {
        let result = resolve(&tip_at(10), &header(7, 1), &walk(10, 7));
        assert_eq!(result.unwrap(), Canonicity::NonCanonical);
    }

    #[test]
    fn tip_itself_is_canonical() {
        let result = resolve(&tip_at(10), &header(10, 0), &walk(10, 10));
        assert_eq!(result.unwrap(), Canonicity::Canonical);
    }

    #[test]
    fn gap_is_unknown_ancestry() {
        let result = resolve(&tip_at(10), &header(3, 0), &walk(10, 6));
        assert!(matches!(
            result,
            Err(CanonicityError::UnknownAncestry { reached: 6, .. })
        ));
    }

    #[test]
    fn unstored_tip_is_unknown_ancestry() {
        let result = resolve(&tip_at(10), &header(3, 0), &[]);
        assert!(matches!(
            result,
            Err(CanonicityError::UnknownAncestry { reached: 10, .. })
        ));
    }

    #[test]
    fn target_above_tip() {
        let result = resolve(&tip_at(10), &header(11, 0), &walk(10, 0));
        assert!(matches!(result, Err(CanonicityError::AheadOfTip { .. })));
    }

    #[tokio::test]
    async fn resolver_follows_reorg() {
        let store = Arc::new(MockStore::default());
        let tip = ChainTip::new();
        let resolver = CanonicityResolver::new(store.clone(), tip.clone());

        let main = chain(6, 0, 0);
        let fork = chain(6, 1, 3);
        for header in &main {
            store.add_header(header, true);
        }
        tip.publish(main[5].pointer());

        assert!(resolver.is_canonical(&main[4].hash).await.unwrap());
        assert_eq!(
            resolver
                .canonicity(&fork[2].hash)
                .await
                .unwrap(),
            // Below the branching point the two chains share headers.
            Canonicity::Canonical
        );

        for header in &fork[3..] {
            store.add_header(header, true);
        }
        tip.publish(fork[5].pointer());

        assert!(!resolver.is_canonical(&main[4].hash).await.unwrap());
        assert!(resolver.is_canonical(&fork[4].hash).await.unwrap());
        assert!(resolver.is_canonical(&main[1].hash).await.unwrap());
    }

    #[tokio::test]
    async fn resolver_errors() {
        let store = Arc::new(MockStore::default());
        let tip = ChainTip::new();
        let resolver = CanonicityResolver::new(store.clone(), tip.clone());
        let main = chain(3, 0, 0);
        store.add_header(&main[0], true);
        store.add_header(&main[2], true);

        assert!(matches!(
            resolver.is_canonical(&main[0].hash).await,
            Err(CanonicityError::NoChainHead)
        ));

        tip.publish(main[2].pointer());
        assert!(matches!(
            resolver.is_canonical(&main[1].hash).await,
            Err(CanonicityError::UnknownHeader(_))
        ));
        assert!(matches!(
            resolver.is_canonical(&main[0].hash).await,
            Err(CanonicityError::UnknownAncestry { .. })
        ));
    }
}
