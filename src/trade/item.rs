//! Item stacks moved through a trade.
//!
//! The trading core never inspects item contents. An item is an opaque
//! kind plus a quantity; what may share a slot and how high a stack may
//! grow are decisions of the surrounding item system, consumed through
//! the [`StackingRule`] trait.

/// Opaque item type identity, owned by the external item system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKind(pub u32);

/// A quantity of a single item kind, treated atomically for
/// merge/split purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemStack {
    /// What the stack is made of.
    pub kind: ItemKind,
    /// How many units it holds. Always at least 1 in a live stack.
    pub quantity: u32,
}

impl ItemStack {
    /// Create a stack.
    pub fn new(kind: ItemKind, quantity: u32) -> Self {
        Self { kind, quantity }
    }
}

/// Stacking capabilities the trading core requires from the item
/// system. The core only ever asks two questions: may these kinds
/// share a slot, and how many units fit in one slot.
pub trait StackingRule: Send + Sync {
    /// Whether stacks of these two kinds may occupy the same slot.
    fn compatible(&self, a: ItemKind, b: ItemKind) -> bool;

    /// Maximum quantity a single slot may hold for this kind.
    fn max_stack(&self, kind: ItemKind) -> u32;
}

/// Same-kind stacking with one uniform per-slot limit.
///
/// The production item system plugs in its own rule; this one covers
/// servers (and tests) whose items all stack the same way.
#[derive(Debug, Clone, Copy)]
pub struct UniformStacking {
    /// Per-slot quantity limit applied to every kind.
    pub max_stack: u32,
}

impl StackingRule for UniformStacking {
    fn compatible(&self, a: ItemKind, b: ItemKind) -> bool {
        a == b
    }

    fn max_stack(&self, _kind: ItemKind) -> u32 {
        self.max_stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_stacking_same_kind_only() {
        let rule = UniformStacking { max_stack: 6 };
        assert!(rule.compatible(ItemKind(3), ItemKind(3)));
        assert!(!rule.compatible(ItemKind(3), ItemKind(4)));
        assert_eq!(rule.max_stack(ItemKind(3)), 6);
    }
}
