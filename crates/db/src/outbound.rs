//! The outbound store contract.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bifrost_primitives::outbound::{ItemKey, OutboundItem, VaultGroup};
use tracing::{error, info};

use crate::errors::DbResult;

/// Items partitioned by the vault group they spend from, each group in processing order.
pub type OrderedLists = BTreeMap<VaultGroup, Vec<OutboundItem>>;

/// Keyed collection of the outbound items this node still has to process.
///
/// Implementations must allow concurrent writers interleaved with listings. A listing is a
/// snapshot: updates made after it returns are only visible to the next listing.
#[async_trait]
pub trait OutboundStore: Send + Sync {
    /// Upserts the item under its key. Storing a spent item removes it instead.
    async fn set(&self, item: &OutboundItem) -> DbResult<()>;

    /// Looks up an item by key.
    async fn get(&self, key: &ItemKey) -> DbResult<Option<OutboundItem>>;

    /// Whether an item is stored under the key.
    async fn has(&self, key: &ItemKey) -> DbResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Deletes the item. Removing an absent item is not an error.
    async fn remove(&self, item: &OutboundItem) -> DbResult<()>;

    /// Stores many items.
    ///
    /// A failure to store one item is logged and does not prevent storing the others.
    async fn batch(&self, items: &[OutboundItem]) -> DbResult<()> {
        let mut stored = 0usize;
        for item in items {
            match self.set(item).await {
                Ok(()) => stored += 1,
                Err(err) => error!(
                    key = %item.key(),
                    height = item.height,
                    chain = %item.chain(),
                    %err,
                    "failed to store outbound item"
                ),
            }
        }

        info!(stored, total = items.len(), "stored outbound batch");
        Ok(())
    }

    /// All pending items in ascending `(height, sequence_index)` order.
    async fn list(&self) -> DbResult<Vec<OutboundItem>>;

    /// The items of [`Self::list`] grouped by vault group, each group in ascending
    /// `(height, sequence_index)` order.
    async fn ordered_lists(&self) -> DbResult<OrderedLists> {
        Ok(group_by_vault(self.list().await?))
    }

    /// Releases the underlying storage. Every later operation fails.
    async fn close(&self) -> DbResult<()>;
}

/// Sorts items in processing order.
///
/// Items of different groups may share a height and index, so the group breaks ties to keep
/// the order total.
pub fn sort_by_priority(items: &mut [OutboundItem]) {
    items.sort_by(|a, b| {
        a.priority()
            .cmp(&b.priority())
            .then_with(|| a.chain().cmp(&b.chain()))
            .then_with(|| a.vault_pub_key().cmp(b.vault_pub_key()))
    });
}

/// Partitions sorted items by vault group, keeping their relative order.
pub fn group_by_vault(items: Vec<OutboundItem>) -> OrderedLists {
    let mut lists = OrderedLists::new();
    for item in items {
        lists.entry(item.group()).or_default().push(item);
    }

    lists
}

/// Checks the behaviour every [`OutboundStore`] implementation must share.
#[cfg(test)]
pub(crate) async fn check_store_contract(store: &dyn OutboundStore) {
    use bifrost_primitives::{chain::Chain, outbound::TxStatus};
    use bifrost_test_utils::{generate_outbound_item, generate_pubkey};

    let vault = generate_pubkey();
    let other_vault = generate_pubkey();

    let first = generate_outbound_item(100, Chain::Btc, &vault, 0);
    let second = generate_outbound_item(100, Chain::Btc, &vault, 1);
    let later = generate_outbound_item(101, Chain::Btc, &vault, 0);
    let other = generate_outbound_item(99, Chain::Eth, &other_vault, 0);

    assert!(
        store.list().await.expect("must list").is_empty(),
        "store must start empty"
    );

    store
        .batch(&[later.clone(), second.clone(), other.clone(), first.clone()])
        .await
        .expect("must store batch");

    let listed = store.list().await.expect("must list");
    assert_eq!(
        listed,
        vec![other.clone(), first.clone(), second.clone(), later.clone()],
        "list must be sorted by height then sequence index"
    );

    let lists = store.ordered_lists().await.expect("must list groups");
    assert_eq!(lists.len(), 2, "items must be split in two groups");
    assert_eq!(
        lists.get(&first.group()),
        Some(&vec![first.clone(), second.clone(), later.clone()])
    );
    assert_eq!(lists.get(&other.group()), Some(&vec![other.clone()]));

    // last write wins
    let mut signed = first.clone();
    signed.status = TxStatus::Signed;
    signed.signed_tx = Some(vec![0xde, 0xad]);
    store.set(&first).await.expect("must set");
    store.set(&signed).await.expect("must set");
    assert_eq!(
        store.get(&first.key()).await.expect("must get"),
        Some(signed.clone()),
        "get must return the last write"
    );
    assert_eq!(
        store.list().await.expect("must list").len(),
        4,
        "updating an item must not duplicate it"
    );

    // spent items are never kept
    let mut spent = second.clone();
    spent.status = TxStatus::Spent;
    store.set(&spent).await.expect("must set");
    assert!(
        !store.has(&second.key()).await.expect("must check"),
        "spent item must be removed"
    );

    store.remove(&later).await.expect("must remove");
    store.remove(&later).await.expect("removal must be idempotent");
    assert!(!store.has(&later.key()).await.expect("must check"));

    assert_eq!(
        store.list().await.expect("must list"),
        vec![other, signed],
        "only untouched items must remain"
    );
}
