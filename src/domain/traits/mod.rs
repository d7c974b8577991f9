//! Domain traits - Abstractions for infrastructure implementations

pub mod bot;
pub mod clock;
pub mod directory;
pub mod store;

pub use bot::{Bot, BotInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::VoterDirectory;
pub use store::SnapshotStore;
