pub mod message;
pub mod placeholder;
pub mod session;

pub use message::{InboundMessage, TurnKey};
pub use placeholder::{Placeholder, PlaceholderStatus, PLACEHOLDER_TTL_HOURS};
pub use session::{Session, SESSION_TTL_HOURS};
