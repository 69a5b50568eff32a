//! Trading core: pure, synchronous, no I/O.
//!
//! Everything in this module runs to completion before returning and
//! touches nothing outside the session it was called on. The network
//! layer drives it; collaborating systems (character inventory, item
//! schema) are reached only through the small traits defined here.

pub mod item;
pub mod session;
pub mod table;

pub use item::{ItemKind, ItemStack, StackingRule, UniformStacking};
pub use session::{
    AddItem, CharacterId, CloseReason, ItemPlacement, SessionId, TradeRole, TradeSession,
};
pub use table::TradeTable;
