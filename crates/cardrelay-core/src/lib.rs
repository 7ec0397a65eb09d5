pub mod config;
pub mod error;
pub mod traits;
pub mod pool;
pub mod scheduler;
pub mod session;
pub mod buffer;
pub mod turns;
pub mod reader;
pub mod orchestrator;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{BufferConfig, PoolConfig, RelayConfig, SessionConfig, MIN_POOL_SIZE};
pub use error::{RelayError, Result};
pub use traits::PlaceholderService;
pub use pool::PlaceholderPool;
pub use scheduler::spawn_daily_rebuild;
pub use session::SessionStore;
pub use buffer::TurnBuffer;
pub use turns::{TurnHandle, TurnRegistry};
pub use reader::{EventKind, ReadSummary, StreamReader};
pub use orchestrator::{TurnOrchestrator, TurnTasks};

// Re-export the data model so callers need a single dependency
pub use cardrelay_types::{InboundMessage, Placeholder, PlaceholderStatus, Session, TurnKey};
