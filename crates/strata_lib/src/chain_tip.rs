use std::sync::Arc;

use strata_common_types::BlockPointer;
use tokio::sync::watch;

/// One observation of the chain head. `version` grows by one every time a
/// different head is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipSnapshot {
    pub version: u64,
    pub head: BlockPointer,
}

/// The newest chain head known to the indexer, shared between the header
/// sync (the only writer) and the read path. Readers always see a complete
/// snapshot, never a head from one update paired with the version of
/// another.
#[derive(Debug, Clone)]
pub struct ChainTip {
    sender: Arc<watch::Sender<Option<TipSnapshot>>>,
}

impl Default for ChainTip {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainTip {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publishes `head` and returns the resulting version. Publishing the
    /// current head again leaves the version unchanged.
    pub fn publish(&self, head: BlockPointer) -> u64 {
        self.sender.send_if_modified(|current| match current {
            Some(snapshot) if snapshot.head == head => false,
            _ => {
                let version = current.as_ref().map_or(1, |s| s.version + 1);
                *current = Some(TipSnapshot { version, head });
                true
            }
        });
        self.snapshot().map_or(0, |s| s.version)
    }

    pub fn snapshot(&self) -> Option<TipSnapshot> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TipSnapshot>> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use strata_common_types::HexString;

    use super::*;

    fn pointer(number: u64) -> BlockPointer {
        BlockPointer {
            number,
            hash: HexString([number as u8; 32]),
        }
    }

    #[test]
    fn starts_empty() {
        assert_eq!(ChainTip::new().snapshot(), None);
    }

    #[test]
    fn versions_only_grow_on_change() {
        let tip = ChainTip::new();

        assert_eq!(tip.publish(pointer(1)), 1);
        assert_eq!(tip.publish(pointer(1)), 1);
        assert_eq!(tip.publish(pointer(2)), 2);

        let snapshot = tip.snapshot().unwrap();
        assert_eq!(snapshot.head, pointer(2));
        assert_eq!(snapshot.version, 2);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let tip = ChainTip::new();
        let mut receiver = tip.subscribe();

        let clone = tip.clone();
        clone.publish(pointer(7));

        receiver.changed().await.unwrap();
        assert_eq!(receiver.borrow().as_ref().unwrap().head, pointer(7));
    }
}
