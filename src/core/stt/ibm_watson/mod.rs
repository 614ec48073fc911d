//! IBM Watson Speech-to-Text over the WebSocket recognize interface.
//!
//! One connection carries one or more recognition requests. Each request is
//! opened with a JSON `start` message, followed by binary audio, and ended
//! with a `stop` message; the service answers with `listening`, `results`
//! and `error` messages on the same socket.
//!
//! # Endpoints
//!
//! | Endpoint | Host |
//! |----------|------|
//! | `us-south` (default) | `api.us-south.speech-to-text.watson.cloud.ibm.com` |
//! | `us-east` | `api.us-east.speech-to-text.watson.cloud.ibm.com` |
//! | `eu-de` | `api.eu-de.speech-to-text.watson.cloud.ibm.com` |
//! | `eu-gb` | `api.eu-gb.speech-to-text.watson.cloud.ibm.com` |
//! | `au-syd` | `api.au-syd.speech-to-text.watson.cloud.ibm.com` |
//! | `jp-tok` | `api.jp-tok.speech-to-text.watson.cloud.ibm.com` |
//! | `kr-seo` | `api.kr-seo.speech-to-text.watson.cloud.ibm.com` |
//!
//! Legacy shared stream hosts (`stream.watsonplatform.net` and friends) and
//! explicit URLs are supported through [`IbmEndpoint`].
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use watson_stream::auth::IamTokenProvider;
//! use watson_stream::core::stt::BaseSTT;
//! use watson_stream::core::stt::ibm_watson::{IbmEndpoint, IbmRegion, IbmWatsonSTT, IbmWatsonSTTConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IbmWatsonSTTConfig {
//!         endpoint: IbmEndpoint::Instance {
//!             region: IbmRegion::UsSouth,
//!             instance_id: std::env::var("WATSON_INSTANCE_ID")?,
//!         },
//!         ..Default::default()
//!     };
//!     let credentials = Arc::new(IamTokenProvider::new(std::env::var("WATSON_API_KEY")?)?);
//!
//!     let mut stt = IbmWatsonSTT::new(config, credentials)?;
//!     stt.on_result(Arc::new(|result| {
//!         Box::pin(async move {
//!             println!("{} ({:.2})", result.transcript, result.confidence);
//!         })
//!     }))
//!     .await?;
//!
//!     stt.connect().await?;
//!     stt.send_audio(vec![0u8; 3200].into()).await?;
//!     stt.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # References
//!
//! - [IBM Watson STT Documentation](https://cloud.ibm.com/docs/speech-to-text)
//! - [WebSocket Interface](https://cloud.ibm.com/docs/speech-to-text?topic=speech-to-text-websockets)

mod client;
pub mod config;
pub mod messages;


pub use client::IbmWatsonSTT;
pub use config::{
    ContentType, ControlMessage, DEFAULT_INACTIVITY_TIMEOUT, DEFAULT_MODEL, IbmEndpoint,
    IbmModel, IbmRegion, IbmWatsonSTTConfig, LegacyHost, MAX_KEYWORDS, QueryParameters,
    RecognitionParameters,
};
pub use messages::{IbmWatsonMessage, WatsonMessageDecoder};
