mod base;
pub mod ibm_watson;

// Re-export public types and traits
pub use base::{BaseSTT, STTError, STTErrorCallback, STTResult, STTResultCallback};

// Re-export IBM Watson implementation
pub use ibm_watson::{
    ContentType, IbmEndpoint, IbmModel, IbmRegion, IbmWatsonMessage, IbmWatsonSTT,
    IbmWatsonSTTConfig, LegacyHost,
};
