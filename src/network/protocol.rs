//! Protocol messages.
//!
//! Two channels share one WebSocket connection:
//!
//! - **Control channel** (text frames, JSON): connection lifecycle —
//!   authentication, trade invitations, ping. Serde-tagged enums.
//! - **Trade channel** (binary frames): the trade session protocol,
//!   encoded by [`codec`](crate::network::codec) as one type-tagged
//!   message per frame.
//!
//! The transport is framed, ordered, and reliable, so trade messages
//! carry no sequence numbers of their own.

use serde::{Deserialize, Serialize};

use crate::trade::item::ItemStack;

// =============================================================================
// TRADE CHANNEL (binary)
// =============================================================================

/// Trade messages sent from client to server. One per binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeClientMessage {
    /// Accept the offer as it currently stands.
    Accept,
    /// Move items from the character's own inventory onto the table.
    AddInventoryItem {
        /// Inventory slot to take from.
        slot: u8,
        /// How many units to move. Non-zero (enforced at decode).
        quantity: u8,
    },
    /// Cancel the trade outright.
    Cancel,
    /// Take the stack in a table slot back into inventory.
    RemoveInventoryItem {
        /// Table slot to clear.
        slot: u8,
    },
    /// Put cash on the table. Positive (enforced at decode).
    AddCash {
        /// Amount to add.
        amount: u64,
    },
    /// Take cash back off the table. Positive (enforced at decode).
    RemoveCash {
        /// Amount to remove.
        amount: u64,
    },
}

/// Trade messages sent from server to client, mirroring session state
/// changes into the client's replica of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeServerMessage {
    /// A trade opened. Sent once per side with an asymmetric payload.
    Open {
        /// Whether the receiving client is the source side.
        is_source: bool,
        /// Display name of the other participant.
        other_name: String,
    },
    /// One side's acceptance flag changed.
    UpdateAccepted {
        /// Whether the change concerns the source side.
        about_source: bool,
        /// New flag value.
        accepted: bool,
    },
    /// One side's table cash changed.
    UpdateCash {
        /// Whether the change concerns the source side.
        about_source: bool,
        /// New cash total on that side.
        total: u64,
    },
    /// One table slot changed.
    UpdateSlot {
        /// Whether the change concerns the source side.
        about_source: bool,
        /// Which slot.
        slot: u8,
        /// New contents; `None` when the slot is now empty. Item
        /// description fields are serialized by the external item
        /// system, not by the trading core.
        stack: Option<ItemStack>,
    },
    /// The trade was canceled.
    Canceled {
        /// Whether the source side initiated the cancellation.
        by_source: bool,
    },
    /// Generic closure notification, sent after Canceled or Completed.
    Closed,
    /// Both sides accepted and the exchange was committed.
    Completed,
}

// =============================================================================
// CONTROL CHANNEL (JSON)
// =============================================================================

/// Control messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Authenticate with the server.
    Auth(AuthRequest),

    /// Invite another character to trade.
    Invite {
        /// Hex-encoded character id of the invitee.
        target: String,
    },

    /// Accept the pending invitation, opening the trade.
    AcceptInvite,

    /// Decline the pending invitation.
    DeclineInvite,

    /// Ping for latency measurement.
    Ping {
        /// Echoed back in the pong.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Token from an external auth provider.
    pub token: String,
    /// Name shown to trade partners.
    pub display_name: Option<String>,
    /// Client version for compatibility check.
    pub client_version: String,
}

/// Control messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    /// Authentication result.
    AuthResult {
        /// Whether auth succeeded.
        success: bool,
        /// Hex-encoded character id if successful.
        character_id: Option<String>,
        /// Error message if failed.
        error: Option<String>,
        /// Server version.
        server_version: String,
    },

    /// Your invitation reached the target.
    InviteDelivered {
        /// Hex-encoded character id of the invitee.
        target: String,
    },

    /// Someone invited you to trade.
    Invited {
        /// Hex-encoded character id of the inviter.
        from: String,
        /// Inviter's display name.
        from_name: String,
    },

    /// Your invitation could not be delivered or was declined.
    InviteFailed {
        /// Human-readable reason.
        reason: String,
    },

    /// Pong response.
    Pong {
        /// Timestamp echoed from the ping.
        timestamp: u64,
        /// Server wall-clock milliseconds.
        server_time: u64,
    },

    /// Error message.
    Error(ControlError),

    /// Server is shutting down.
    Shutdown {
        /// Human-readable reason.
        reason: String,
    },
}

/// Control-channel error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Control-channel error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// Invalid input.
    InvalidInput,
    /// Either party is already in a trade.
    AlreadyTrading,
    /// Target character is unknown or unreachable.
    CharacterUnavailable,
    /// Internal error.
    InternalError,
}

impl ControlMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ControlResponse {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
