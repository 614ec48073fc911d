pub mod session;
pub mod stt;

// Re-export commonly used types for convenience
pub use session::{
    SessionBuilder, SessionConfig, SessionError, SessionEvent, SessionState, StreamSession,
    Termination,
};
pub use stt::{BaseSTT, IbmWatsonSTT, IbmWatsonSTTConfig, STTError, STTResult};
