//! # Peertrade Server
//!
//! Server-authoritative trading for player-to-player item and cash
//! exchange. Clients only ever send intents; every table mutation,
//! acceptance check and final exchange is decided here.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     PEERTRADE SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  trade/          - Trading core (pure, no I/O)               │
//! │  ├── item.rs     - Item stacks and stacking rules            │
//! │  ├── table.rs    - One side's offer: slots, cash, accepted   │
//! │  └── session.rs  - Two-party state machine and invariants    │
//! │                                                              │
//! │  network/        - Transport and dispatch                    │
//! │  ├── codec.rs    - Binary trade frame encoding               │
//! │  ├── protocol.rs - Trade and control message types           │
//! │  ├── handler.rs  - Dispatch, commit, cancel, notifications   │
//! │  ├── registry.rs - One open trade per character              │
//! │  ├── auth.rs     - JWT validation                            │
//! │  └── server.rs   - WebSocket server and accounts directory   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//!
//! The trading core guarantees, regardless of message order:
//! - Table cash never goes negative and items never duplicate: every
//!   unit on a table was taken from its owner first, and every close
//!   path returns or delivers exactly what the tables hold.
//! - Item placement is full-or-nothing per stacking rules, with at
//!   most one remainder stack handed back to the owner.
//! - A closed session never changes again; late messages are dropped.
//! - Any successful mutation clears both acceptance flags, so nobody
//!   can swap the offer after the other side agreed.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod network;
pub mod trade;

// Re-export commonly used types
pub use network::{CharacterGateway, TradeNetworkHandler, TradeRegistry, TradeServer};
pub use trade::{
    CharacterId, CloseReason, ItemKind, ItemStack, StackingRule, TradeRole, TradeSession,
    TradeTable, UniformStacking,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Table slots on each side of a trade
pub const DEFAULT_SLOTS_PER_SIDE: usize = 8;

/// Default cap on units per table slot
pub const DEFAULT_MAX_STACK: u32 = 100;
