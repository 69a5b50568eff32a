//! Trade message dispatch and notification fan-out.
//!
//! [`TradeNetworkHandler`] sits between the transport and the trading
//! core: it resolves the acting character's session, drives the
//! session operation, moves real cash and items through the
//! [`CharacterGateway`], and mirrors every successful state change to
//! both participants as trade-channel frames.
//!
//! It is also the live trade controller: after each accept it checks
//! for mutual agreement and commits the exchange, and on cancellation
//! (explicit or via disconnect) it refunds whatever was still on both
//! tables.
//!
//! Expected rejections (insufficient table cash, full table, closed
//! session) produce no notification at all — the absence of an update
//! is the client's signal. Conditions that can only arise from a
//! defect in calling code are counted and logged through
//! [`report_invariant_violation`], never raised as errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::network::codec::{self, CodecError, ItemWire};
use crate::network::protocol::{TradeClientMessage, TradeServerMessage};
use crate::network::registry::{RegistryError, TradeRegistry};
use crate::trade::item::{ItemStack, StackingRule};
use crate::trade::session::{AddItem, CharacterId, TradeRole, TradeSession};

/// Capabilities the trading layer needs from the surrounding character
/// and item systems. Injected into the handler; the handler never
/// reaches past this seam.
pub trait CharacterGateway: Send + Sync {
    /// Name shown to the other participant.
    fn display_name(&self, id: CharacterId) -> Option<String>;

    /// Whether a message can currently be delivered to this character.
    fn is_reachable(&self, id: CharacterId) -> bool;

    /// Deduct from the character's real cash balance. False (and no
    /// change) if the balance is insufficient.
    fn take_cash(&self, id: CharacterId, amount: u64) -> bool;

    /// Credit the character's real cash balance.
    fn give_cash(&self, id: CharacterId, amount: u64);

    /// Take up to `quantity` units out of the character's inventory
    /// slot. `None` if the slot is empty or out of range.
    fn take_item(&self, id: CharacterId, inventory_slot: u8, quantity: u8) -> Option<ItemStack>;

    /// Return a stack to the character's inventory. Must not lose it.
    fn give_item(&self, id: CharacterId, stack: ItemStack);

    /// Deliver an encoded trade frame. False if undeliverable.
    fn send_frame(&self, id: CharacterId, frame: Vec<u8>) -> bool;
}

/// Dispatches decoded trade messages and broadcasts state changes.
pub struct TradeNetworkHandler {
    gateway: Arc<dyn CharacterGateway>,
    registry: Arc<TradeRegistry>,
    rules: Arc<dyn StackingRule>,
    items: Arc<dyn ItemWire>,
    violations: AtomicU64,
}

impl TradeNetworkHandler {
    /// Wire up a handler with its collaborators.
    pub fn new(
        gateway: Arc<dyn CharacterGateway>,
        registry: Arc<TradeRegistry>,
        rules: Arc<dyn StackingRule>,
        items: Arc<dyn ItemWire>,
    ) -> Self {
        Self {
            gateway,
            registry,
            rules,
            items,
            violations: AtomicU64::new(0),
        }
    }

    /// The registry this handler resolves sessions through.
    pub fn registry(&self) -> &Arc<TradeRegistry> {
        &self.registry
    }

    /// How many invariant violations have been reported. Correct
    /// calling code keeps this at zero; tests assert on it.
    pub fn invariant_violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Open a trade between two characters and tell each side.
    pub async fn open_trade(
        &self,
        source: CharacterId,
        target: CharacterId,
    ) -> Result<(), RegistryError> {
        let handle = self.registry.open(source, target).await?;
        let session = handle.lock().await;
        info!(
            session = %hex::encode(session.id()),
            source = %source.short_hex(),
            target = %target.short_hex(),
            "trade opened"
        );
        self.write_open(&session, source);
        self.write_open(&session, target);
        Ok(())
    }

    /// Decode and dispatch one binary frame from a client.
    pub async fn handle_frame(&self, from: CharacterId, frame: &[u8]) {
        match codec::decode_client_message(frame) {
            Ok(Some(msg)) => self.handle_message(from, msg).await,
            // Recognized frame with a non-positive value: dropped
            // without a protocol error.
            Ok(None) => {
                debug!(from = %from.short_hex(), "dropped trade frame with non-positive value");
            }
            Err(CodecError::UnknownKind(kind)) => {
                error!(from = %from.short_hex(), kind, "unknown trade message kind");
            }
            Err(err) => {
                debug!(from = %from.short_hex(), %err, "malformed trade frame");
            }
        }
    }

    /// Dispatch one decoded client message to the sender's session.
    pub async fn handle_message(&self, from: CharacterId, msg: TradeClientMessage) {
        let Some(handle) = self.registry.session_for(from).await else {
            debug!(from = %from.short_hex(), "trade message without an open session");
            return;
        };
        let mut session = handle.lock().await;
        let Some(role) = session.role_of(from) else {
            self.report_invariant_violation(
                "dispatch",
                &format!("registry mapped {} to a foreign session", from.short_hex()),
            );
            return;
        };

        match msg {
            TradeClientMessage::Accept => {
                if !session.accept(from) {
                    return;
                }
                self.write_update_accepted(&session, role);
                if session.both_accepted() {
                    self.commit(&mut session).await;
                }
            }

            TradeClientMessage::AddCash { amount } => {
                if session.is_closed() {
                    return;
                }
                // Deduct from the real balance first; the table only
                // ever holds cash that has already left the character.
                if !self.gateway.take_cash(from, amount) {
                    debug!(from = %from.short_hex(), amount, "add cash rejected: insufficient balance");
                    return;
                }
                let before = acceptance_snapshot(&session);
                if session.add_cash(from, amount) {
                    self.notify_acceptance_resets(&session, before);
                    self.write_update_cash(&session, role);
                } else {
                    self.report_invariant_violation("add_cash", "open session refused a deposit");
                    self.gateway.give_cash(from, amount);
                }
            }

            TradeClientMessage::RemoveCash { amount } => {
                let before = acceptance_snapshot(&session);
                if session.try_remove_cash(from, amount) {
                    self.gateway.give_cash(from, amount);
                    self.notify_acceptance_resets(&session, before);
                    self.write_update_cash(&session, role);
                }
            }

            TradeClientMessage::AddInventoryItem { slot, quantity } => {
                if session.is_closed() {
                    return;
                }
                let Some(stack) = self.gateway.take_item(from, slot, quantity) else {
                    debug!(from = %from.short_hex(), slot, "add item rejected: inventory slot unavailable");
                    return;
                };
                let before = acceptance_snapshot(&session);
                match session.try_add_item(from, stack, self.rules.as_ref()) {
                    AddItem::Placed(placement) => {
                        if let Some(remainder) = placement.remainder {
                            self.gateway.give_item(from, remainder);
                        }
                        if !placement.changed_slots.is_empty() {
                            self.notify_acceptance_resets(&session, before);
                            for table_slot in placement.changed_slots {
                                self.write_update_slot(&session, role, table_slot);
                            }
                        }
                    }
                    AddItem::Refused(stack) => {
                        self.report_invariant_violation("add_item", "open session refused a participant");
                        self.gateway.give_item(from, stack);
                    }
                }
            }

            TradeClientMessage::RemoveInventoryItem { slot } => {
                let before = acceptance_snapshot(&session);
                if let Some(stack) = session.try_remove_item(from, usize::from(slot)) {
                    self.gateway.give_item(from, stack);
                    self.notify_acceptance_resets(&session, before);
                    self.write_update_slot(&session, role, slot);
                }
            }

            TradeClientMessage::Cancel => {
                self.close_canceled(&mut session, Some(role)).await;
            }
        }
    }

    /// Cancel a character's open trade without their participation
    /// (administrative path and disconnect path).
    pub async fn admin_cancel(&self, participant: CharacterId) -> bool {
        let Some(handle) = self.registry.session_for(participant).await else {
            return false;
        };
        let mut session = handle.lock().await;
        self.close_canceled(&mut session, None).await
    }

    /// A participant's connection went away: their trade cannot
    /// continue, so cancel it on their behalf.
    pub async fn handle_disconnect(&self, who: CharacterId) {
        let Some(handle) = self.registry.session_for(who).await else {
            return;
        };
        let mut session = handle.lock().await;
        let by = session.role_of(who);
        self.close_canceled(&mut session, by).await;
    }

    /// Commit a mutually accepted trade: swap both tables' contents
    /// through the gateway and close the session as completed. Called
    /// with the session lock held, immediately after observing double
    /// acceptance.
    async fn commit(&self, session: &mut TradeSession) {
        if !session.complete() {
            self.report_invariant_violation("commit", "commit without mutual acceptance");
            return;
        }

        for role in [TradeRole::Source, TradeRole::Target] {
            let recipient = session.participant(role.other());
            let side = session.side(role);
            for stack in side.offered_items() {
                self.gateway.give_item(recipient, stack);
            }
            if side.cash() > 0 {
                self.gateway.give_cash(recipient, side.cash());
            }
        }

        self.broadcast(session, &TradeServerMessage::Completed);
        self.broadcast(session, &TradeServerMessage::Closed);
        self.registry.release(session.participants()).await;
        info!(session = %hex::encode(session.id()), "trade completed");
    }

    /// Close a session as canceled, refund everything still on both
    /// tables to its owner, notify, and clear the registry mapping.
    async fn close_canceled(&self, session: &mut TradeSession, by: Option<TradeRole>) -> bool {
        if !session.cancel(by) {
            return false;
        }

        for role in [TradeRole::Source, TradeRole::Target] {
            let owner = session.participant(role);
            let side = session.side(role);
            for stack in side.offered_items() {
                self.gateway.give_item(owner, stack);
            }
            if side.cash() > 0 {
                self.gateway.give_cash(owner, side.cash());
            }
        }

        self.write_canceled(session, by);
        self.broadcast(session, &TradeServerMessage::Closed);
        self.registry.release(session.participants()).await;
        info!(
            session = %hex::encode(session.id()),
            by = ?by,
            "trade canceled"
        );
        true
    }

    // -------------------------------------------------------------------------
    // Notification writers
    // -------------------------------------------------------------------------

    /// Tell one participant a trade opened. Payload is asymmetric:
    /// each side learns its own role and the other's name.
    fn write_open(&self, session: &TradeSession, to: CharacterId) {
        let Some(role) = session.role_of(to) else {
            self.report_invariant_violation(
                "write_open",
                &format!("{} is not a participant", to.short_hex()),
            );
            return;
        };
        let other = session.participant(role.other());
        let other_name = self.gateway.display_name(other).unwrap_or_default();
        self.send_to(
            to,
            &TradeServerMessage::Open {
                is_source: role.is_source(),
                other_name,
            },
        );
    }

    /// Mirror one side's acceptance flag to both participants.
    fn write_update_accepted(&self, session: &TradeSession, about: TradeRole) {
        self.broadcast(
            session,
            &TradeServerMessage::UpdateAccepted {
                about_source: about.is_source(),
                accepted: session.side(about).accepted(),
            },
        );
    }

    /// Mirror one side's cash total to both participants.
    fn write_update_cash(&self, session: &TradeSession, about: TradeRole) {
        self.broadcast(
            session,
            &TradeServerMessage::UpdateCash {
                about_source: about.is_source(),
                total: session.side(about).cash(),
            },
        );
    }

    /// Mirror one table slot to both participants.
    fn write_update_slot(&self, session: &TradeSession, about: TradeRole, slot: u8) {
        self.broadcast(
            session,
            &TradeServerMessage::UpdateSlot {
                about_source: about.is_source(),
                slot,
                stack: session.side(about).slot(usize::from(slot)).copied(),
            },
        );
    }

    /// Announce a cancellation. An administrative cancel reports the
    /// source side as not having initiated it.
    fn write_canceled(&self, session: &TradeSession, by: Option<TradeRole>) {
        self.broadcast(
            session,
            &TradeServerMessage::Canceled {
                by_source: matches!(by, Some(TradeRole::Source)),
            },
        );
    }

    /// After a successful mutation both acceptance flags are down;
    /// announce the drop for each side that was accepting before.
    fn notify_acceptance_resets(&self, session: &TradeSession, before: [bool; 2]) {
        for role in [TradeRole::Source, TradeRole::Target] {
            if before[role.index()] && !session.side(role).accepted() {
                self.write_update_accepted(session, role);
            }
        }
    }

    /// Send to every reachable participant; unreachable ones are
    /// skipped, never queued or retried.
    fn broadcast(&self, session: &TradeSession, msg: &TradeServerMessage) {
        for who in session.participants() {
            if !self.gateway.is_reachable(who) {
                debug!(to = %who.short_hex(), "skipping notification for unreachable participant");
                continue;
            }
            self.send_to(who, msg);
        }
    }

    fn send_to(&self, to: CharacterId, msg: &TradeServerMessage) {
        if !self.gateway.is_reachable(to) {
            return;
        }
        let frame = codec::encode_server_message(msg, self.items.as_ref());
        if !self.gateway.send_frame(to, frame) {
            debug!(to = %to.short_hex(), "trade notification not delivered");
        }
    }

    /// Single side channel for conditions that indicate a defect in
    /// calling code rather than client input. Logged and counted; the
    /// offending call returns silently.
    fn report_invariant_violation(&self, context: &str, detail: &str) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        error!(context, detail, "trade invariant violation");
    }
}

fn acceptance_snapshot(session: &TradeSession) -> [bool; 2] {
    [
        session.side(TradeRole::Source).accepted(),
        session.side(TradeRole::Target).accepted(),
    ]
}
