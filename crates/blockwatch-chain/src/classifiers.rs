//! Classifiers for chain data.

use std::collections::{BTreeMap, HashMap};

use blockwatch_engine::Classifier;

use crate::types::{Account, Block, GlobalProperties, OperationRecord};

/// Current head. Serves as the clock every other chain collector keys off.
pub struct HeadClassifier;

impl Classifier for HeadClassifier {
    const NAME: &'static str = "head";
    type Data = GlobalProperties;
    type QueryOptions = ();
    type QueryResult = ();
    type Store = ();
}

/// Blocks that became available since the previous tick, oldest first.
///
/// Queried with a block number to fetch that single block.
pub struct BlockClassifier;

impl Classifier for BlockClassifier {
    const NAME: &'static str = "blocks";
    type Data = Vec<Block>;
    type QueryOptions = u64;
    type QueryResult = Option<Block>;
    type Store = ();
}

/// Operations of the blocks in [`BlockClassifier`], flattened in order.
pub struct OperationsClassifier;

impl Classifier for OperationsClassifier {
    const NAME: &'static str = "operations";
    type Data = Vec<OperationRecord>;
    type QueryOptions = ();
    type QueryResult = ();
    type Store = ();
}

/// Accounts registered by name, keyed by name.
///
/// Queried with explicit names for a one-off lookup. The store remembers
/// balances between ticks.
pub struct AccountClassifier;

impl Classifier for AccountClassifier {
    const NAME: &'static str = "accounts";
    type Data = BTreeMap<String, Account>;
    type QueryOptions = Vec<String>;
    type QueryResult = Vec<Account>;
    type Store = BalanceHistory;
}

#[derive(Debug, Clone)]
struct BalanceSnapshot {
    previous: Option<String>,
    current: String,
    tick: u64,
}

impl BalanceSnapshot {
    fn changed(&self) -> bool {
        self.previous.as_ref().is_some_and(|previous| *previous != self.current)
    }
}

/// Last seen balance per account.
#[derive(Debug, Default)]
pub struct BalanceHistory {
    snapshots: HashMap<String, BalanceSnapshot>,
}

impl BalanceHistory {
    /// Records `balance` for `account` as seen at `tick` and reports whether
    /// it differs from the balance seen at the previous observed tick.
    ///
    /// Observing the same account again within one tick returns the same
    /// answer without shifting the history. The first sighting never counts
    /// as a change.
    pub fn observe(&mut self, account: &str, balance: &str, tick: u64) -> bool {
        match self.snapshots.get_mut(account) {
            Some(snapshot) if snapshot.tick == tick => snapshot.changed(),
            Some(snapshot) => {
                snapshot.previous = Some(std::mem::replace(&mut snapshot.current, balance.to_string()));
                snapshot.tick = tick;
                snapshot.changed()
            }
            None => {
                self.snapshots.insert(
                    account.to_string(),
                    BalanceSnapshot {
                        previous: None,
                        current: balance.to_string(),
                        tick,
                    },
                );
                false
            }
        }
    }

    pub fn current(&self, account: &str) -> Option<&str> {
        self.snapshots.get(account).map(|s| s.current.as_str())
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
