//! Application layer - coordinator loop, control surface and CLI

pub mod bootstrap;
pub mod commands;
pub mod control;
pub mod coordinator;
pub mod snapshot;

pub use bootstrap::Engine;
pub use commands::{Cli, CommandExecutor, Commands};
pub use control::{ControlHandle, LivePolicy};
pub use coordinator::{Coordinator, EngineParts};
pub use snapshot::{Abandonment, EngineSnapshot};
