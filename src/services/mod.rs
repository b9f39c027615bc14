pub mod notifier;
pub mod orchestrator;
pub mod scrobbler;
pub mod sources;
pub mod store;

pub use notifier::{ChannelSubscriber, ScrobbleNotifier};
pub use orchestrator::{SessionOrchestrator, SessionsChanged};
pub use scrobbler::ScrobbleEngine;
pub use sources::{DefaultSourceFactory, SourceFactory};
pub use store::{ScrobbleStore, SqliteStore};
