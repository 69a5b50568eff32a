//! Trade session state machine.
//!
//! A [`TradeSession`] is the server-authoritative coordinator for one
//! trade between exactly two characters. It owns the two per-side
//! tables and every mutation path over them, so the consistency
//! guarantees (no item or cash duplication or loss) live here and only
//! here. Sessions are ephemeral: opened when two characters agree to
//! trade, closed on cancellation or mutual acceptance, then discarded.

use crate::trade::item::{ItemStack, StackingRule};
use crate::trade::table::TradeTable;

/// Unique session identifier.
pub type SessionId = [u8; 16];

/// Opaque character reference supplied by the external character
/// system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CharacterId(pub [u8; 16]);

impl CharacterId {
    /// Wrap raw identifier bytes.
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Short hex form for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

/// One of the two roles in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeRole {
    /// The initiator of the trade.
    Source,
    /// The invitee.
    Target,
}

impl TradeRole {
    /// Index into the session's side arrays.
    pub fn index(self) -> usize {
        match self {
            TradeRole::Source => 0,
            TradeRole::Target => 1,
        }
    }

    /// The opposite role.
    pub fn other(self) -> TradeRole {
        match self {
            TradeRole::Source => TradeRole::Target,
            TradeRole::Target => TradeRole::Source,
        }
    }

    /// Whether this is the source side.
    pub fn is_source(self) -> bool {
        matches!(self, TradeRole::Source)
    }
}

/// Why a session closed. Recorded for notification purposes only;
/// sessions are never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A participant (or an administrative caller, `by == None`)
    /// canceled the trade.
    Canceled {
        /// Which side initiated the cancellation, if any.
        by: Option<TradeRole>,
    },
    /// Both sides accepted and the exchange was committed.
    Completed,
}

/// Result of a [`TradeSession::try_add_item`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddItem {
    /// Session closed or caller not a participant. The stack is handed
    /// back untouched; nothing changed.
    Refused(ItemStack),
    /// The stack was at least partially placed.
    Placed(ItemPlacement),
}

/// Details of a successful (possibly partial) item placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPlacement {
    /// Portion that did not fit anywhere. The caller must return it to
    /// the character's own inventory. `None` when fully placed.
    pub remainder: Option<ItemStack>,
    /// Slots whose contents changed, in slot order.
    pub changed_slots: Vec<u8>,
}

/// The authoritative state machine for one trade.
#[derive(Debug)]
pub struct TradeSession {
    id: SessionId,
    participants: [CharacterId; 2],
    sides: [TradeTable; 2],
    closed: Option<CloseReason>,
}

impl TradeSession {
    /// Open a session between two characters. `source` initiated the
    /// trade; identities are fixed for the session's lifetime.
    pub fn new(
        id: SessionId,
        source: CharacterId,
        target: CharacterId,
        slots_per_side: usize,
    ) -> Self {
        Self {
            id,
            participants: [source, target],
            sides: [TradeTable::new(slots_per_side), TradeTable::new(slots_per_side)],
            closed: None,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Which role a character holds, or `None` for an outsider.
    pub fn role_of(&self, who: CharacterId) -> Option<TradeRole> {
        if who == self.participants[0] {
            Some(TradeRole::Source)
        } else if who == self.participants[1] {
            Some(TradeRole::Target)
        } else {
            None
        }
    }

    /// Character holding the given role.
    pub fn participant(&self, role: TradeRole) -> CharacterId {
        self.participants[role.index()]
    }

    /// Both participants, source first.
    pub fn participants(&self) -> [CharacterId; 2] {
        self.participants
    }

    /// The table belonging to one role.
    pub fn side(&self, role: TradeRole) -> &TradeTable {
        &self.sides[role.index()]
    }

    /// Whether the session has reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Why the session closed, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed
    }

    /// Whether both sides currently accept the offer.
    pub fn both_accepted(&self) -> bool {
        self.sides[0].accepted && self.sides[1].accepted
    }

    /// Mark the caller's side as accepting the offer as it stands.
    /// Idempotent. Returns false if the session is closed or the
    /// caller is not a participant. The owner checks
    /// [`both_accepted`](Self::both_accepted) afterwards to detect
    /// mutual agreement.
    pub fn accept(&mut self, who: CharacterId) -> bool {
        if self.is_closed() {
            return false;
        }
        let Some(role) = self.role_of(who) else {
            return false;
        };
        self.sides[role.index()].accepted = true;
        true
    }

    /// Add cash the caller has already deducted from the character's
    /// real holdings. `amount` must be positive; there is no upper
    /// bound on table cash (the accumulator saturates at `u64::MAX`).
    /// Returns false (and takes nothing) if the session is closed, the
    /// caller is not a participant, or `amount == 0` — the caller must
    /// then refund the deduction.
    pub fn add_cash(&mut self, who: CharacterId, amount: u64) -> bool {
        if self.is_closed() || amount == 0 {
            return false;
        }
        let Some(role) = self.role_of(who) else {
            return false;
        };
        let side = &mut self.sides[role.index()];
        side.cash = side.cash.saturating_add(amount);
        self.reset_acceptance();
        true
    }

    /// Take cash back off the table. All-or-nothing: if the side's
    /// accumulator holds at least `amount` it is decremented and the
    /// caller must refund `amount` to the character; otherwise nothing
    /// changes and false is returned.
    pub fn try_remove_cash(&mut self, who: CharacterId, amount: u64) -> bool {
        if self.is_closed() || amount == 0 {
            return false;
        }
        let Some(role) = self.role_of(who) else {
            return false;
        };
        let side = &mut self.sides[role.index()];
        if side.cash < amount {
            return false;
        }
        side.cash -= amount;
        self.reset_acceptance();
        true
    }

    /// Place a stack on the caller's side of the table.
    ///
    /// Merge targets are tried first-fit in slot order (compatible,
    /// non-full stacks per `rules`), then remaining units fill empty
    /// slots in order. Whatever still does not fit comes back as a
    /// single remainder stack the caller must return to the
    /// character's inventory. Either the full quantity lands on the
    /// table, or the committed portion plus the remainder equals the
    /// original quantity exactly.
    pub fn try_add_item(
        &mut self,
        who: CharacterId,
        stack: ItemStack,
        rules: &dyn StackingRule,
    ) -> AddItem {
        if self.is_closed() {
            return AddItem::Refused(stack);
        }
        let Some(role) = self.role_of(who) else {
            return AddItem::Refused(stack);
        };

        let max = rules.max_stack(stack.kind);
        let mut remaining = stack.quantity;
        let mut changed = Vec::new();
        let side = &mut self.sides[role.index()];

        for (i, slot) in side.slots.iter_mut().enumerate() {
            if remaining == 0 {
                break;
            }
            if let Some(existing) = slot {
                if existing.quantity < max && rules.compatible(existing.kind, stack.kind) {
                    let moved = (max - existing.quantity).min(remaining);
                    existing.quantity += moved;
                    remaining -= moved;
                    changed.push(i as u8);
                }
            }
        }

        for (i, slot) in side.slots.iter_mut().enumerate() {
            if remaining == 0 {
                break;
            }
            if slot.is_none() {
                let placed = remaining.min(max);
                *slot = Some(ItemStack::new(stack.kind, placed));
                remaining -= placed;
                changed.push(i as u8);
            }
        }

        if !changed.is_empty() {
            self.reset_acceptance();
        }

        AddItem::Placed(ItemPlacement {
            remainder: (remaining > 0).then(|| ItemStack::new(stack.kind, remaining)),
            changed_slots: changed,
        })
    }

    /// Take a stack back off the caller's side. Returns the removed
    /// stack (the caller must return it to the character), or `None`
    /// if the slot was empty, the index out of range, the session
    /// closed, or the caller not a participant.
    pub fn try_remove_item(&mut self, who: CharacterId, slot_index: usize) -> Option<ItemStack> {
        if self.is_closed() {
            return None;
        }
        let role = self.role_of(who)?;
        let side = &mut self.sides[role.index()];
        let removed = side.slots.get_mut(slot_index)?.take()?;
        self.reset_acceptance();
        Some(removed)
    }

    /// Close the session as canceled. Unconditional and immediate: no
    /// agreement from the other side is needed, and an administrative
    /// caller passes `by = None`. The owner is responsible for
    /// refunding everything still on both tables after observing the
    /// cancellation. Returns false only if already closed.
    pub fn cancel(&mut self, by: Option<TradeRole>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.closed = Some(CloseReason::Canceled { by });
        true
    }

    /// Close the session as completed. Only valid while open with both
    /// sides accepting; the owner detects that condition and then
    /// commits the exchange. Returns false otherwise, with no change.
    pub fn complete(&mut self) -> bool {
        if self.is_closed() || !self.both_accepted() {
            return false;
        }
        self.closed = Some(CloseReason::Completed);
        true
    }

    // Changing the offer un-accepts it, on both sides.
    fn reset_acceptance(&mut self) {
        self.sides[0].accepted = false;
        self.sides[1].accepted = false;
    }
}
