pub mod request;
pub mod sample;
pub mod scrobble;
pub mod session;
pub mod user;

pub use request::{SourcePath, UserPath};
pub use sample::PlaybackSample;
pub use scrobble::{NewScrobble, Scrobble, ScrobbleEvent};
pub use session::{NewSessionRecord, SessionRecord, SessionSummary, SourceKind};
pub use user::{LastFmCredentials, SpotifyCredentials, User};
