//! Per-side trade table: item slots, a cash accumulator, and the
//! acceptance flag.
//!
//! Pure storage. The table carries no validation of its own; every
//! invariant is enforced by [`TradeSession`](crate::trade::session::TradeSession),
//! which is the only writer.

use crate::trade::item::ItemStack;

/// What one side has currently offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeTable {
    pub(crate) slots: Vec<Option<ItemStack>>,
    pub(crate) cash: u64,
    pub(crate) accepted: bool,
}

impl TradeTable {
    /// Create an empty table with a fixed number of slots.
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: vec![None; slot_count],
            cash: 0,
            accepted: false,
        }
    }

    /// Number of slots (fixed for the table's lifetime).
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Contents of one slot, or `None` for an out-of-range index or an
    /// empty slot.
    pub fn slot(&self, index: usize) -> Option<&ItemStack> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    /// All slots in order.
    pub fn slots(&self) -> &[Option<ItemStack>] {
        &self.slots
    }

    /// Cash currently on the table.
    pub fn cash(&self) -> u64 {
        self.cash
    }

    /// Whether this side has accepted the offer as it stands.
    pub fn accepted(&self) -> bool {
        self.accepted
    }

    /// Snapshot of every offered stack, in slot order.
    pub fn offered_items(&self) -> Vec<ItemStack> {
        self.slots.iter().filter_map(|s| *s).collect()
    }

    /// Total quantity of items on the table (test/diagnostic helper).
    pub fn total_quantity(&self) -> u64 {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|s| u64::from(s.quantity))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::item::ItemKind;

    #[test]
    fn test_new_table_is_empty() {
        let table = TradeTable::new(8);
        assert_eq!(table.slot_count(), 8);
        assert_eq!(table.cash(), 0);
        assert!(!table.accepted());
        assert!(table.offered_items().is_empty());
        assert!(table.slot(0).is_none());
        assert!(table.slot(99).is_none());
    }

    #[test]
    fn test_offered_items_skips_gaps() {
        let mut table = TradeTable::new(4);
        table.slots[0] = Some(ItemStack::new(ItemKind(1), 5));
        table.slots[2] = Some(ItemStack::new(ItemKind(2), 1));

        let offered = table.offered_items();
        assert_eq!(offered.len(), 2);
        assert_eq!(offered[0].kind, ItemKind(1));
        assert_eq!(offered[1].kind, ItemKind(2));
        assert_eq!(table.total_quantity(), 6);
    }
}
