use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use watson_stream::ClientConfig;
use watson_stream::core::stt::ibm_watson::{ContentType, IbmEndpoint, IbmModel, IbmRegion};
use watson_stream::core::stt::{BaseSTT, IbmWatsonSTT, STTErrorCallback, STTResultCallback};

/// Bytes per second assumed for raw files when pacing chunks.
const RAW_BYTES_PER_SECOND: usize = 32_000;

/// Streaming client for IBM Watson Speech to Text
#[derive(Parser, Debug)]
#[command(name = "watson-stream")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream an audio file and print the transcript
    Transcribe(TranscribeArgs),
}

#[derive(Args, Debug)]
struct TranscribeArgs {
    /// WAV file, or any other format the service accepts
    file: PathBuf,

    /// Recognition model (e.g. en-US_BroadbandModel)
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// IBM Cloud region of the service instance
    #[arg(short = 'r', long)]
    region: Option<String>,

    /// Audio MIME type; detected from WAV headers when omitted
    #[arg(long = "content-type")]
    content_type: Option<String>,

    /// Audio per message in milliseconds
    #[arg(long = "chunk-ms", default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    chunk_ms: u64,

    /// Print interim hypotheses
    #[arg(long)]
    interim: bool,

    /// Pace chunks at playback speed
    #[arg(long)]
    realtime: bool,
}

/// Audio prepared for streaming.
struct AudioSource {
    content_type: ContentType,
    data: Vec<u8>,
    bytes_per_second: usize,
}

fn load_audio(path: &Path, content_type: Option<ContentType>) -> anyhow::Result<AudioSource> {
    let is_wav = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));

    if is_wav && content_type.is_none() {
        let reader = hound::WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
        let format = reader.spec();
        if format.sample_format != hound::SampleFormat::Int || format.bits_per_sample != 16 {
            bail!(
                "Only 16-bit PCM WAV files can be streamed as audio/l16 (got {}-bit {:?}); pass --content-type audio/wav to send the file as is",
                format.bits_per_sample,
                format.sample_format
            );
        }

        let mut data = Vec::with_capacity(reader.len() as usize * 2);
        for sample in reader.into_samples::<i16>() {
            data.extend_from_slice(&sample?.to_le_bytes());
        }
        info!(
            "Loaded {} ({} Hz, {} channel(s), {} bytes of PCM)",
            path.display(),
            format.sample_rate,
            format.channels,
            data.len()
        );
        return Ok(AudioSource {
            content_type: ContentType::L16 {
                rate: format.sample_rate,
                channels: Some(format.channels as u8),
            },
            bytes_per_second: format.sample_rate as usize * format.channels as usize * 2,
            data,
        });
    }

    let mut data = Vec::new();
    BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    )
    .read_to_end(&mut data)?;

    let content_type = content_type.unwrap_or(ContentType::OctetStream);
    let bytes_per_second = match content_type {
        ContentType::L16 {
            rate,
            channels,
        } => rate as usize * channels.unwrap_or(1) as usize * 2,
        ContentType::Mulaw { rate } | ContentType::Alaw { rate } => rate as usize,
        _ => RAW_BYTES_PER_SECOND,
    };
    Ok(AudioSource {
        content_type,
        data,
        bytes_per_second,
    })
}

async fn transcribe(mut config: ClientConfig, args: TranscribeArgs) -> anyhow::Result<()> {
    let TranscribeArgs {
        file,
        model,
        region,
        content_type,
        chunk_ms,
        interim,
        realtime,
    } = args;

    if let Some(model) = model {
        config.query.model = model.parse::<IbmModel>().unwrap_or_else(|never| match never {});
    }
    if let Some(region) = region {
        let region: IbmRegion = region.parse()?;
        match &mut config.endpoint {
            IbmEndpoint::Instance { region: r, .. } => *r = region,
            other => warn!("--region ignored for endpoint {:?}", other),
        }
    }
    let content_type = content_type
        .map(|raw| raw.parse::<ContentType>())
        .transpose()?;
    if interim {
        config.recognition.interim_results = true;
    }

    let audio = load_audio(&file, content_type)?;
    config.content_type = audio.content_type;

    let chunk_size = (audio.bytes_per_second * chunk_ms as usize / 1000).max(1);
    let credentials = Arc::new(config.credentials()?);
    let mut stt = IbmWatsonSTT::new(config.stt_config(), credentials)?;

    let on_result: STTResultCallback = Arc::new(|result| {
        Box::pin(async move {
            if result.is_final {
                println!("{} ({:.2})", result.transcript, result.confidence);
            } else {
                eprintln!("... {}", result.transcript);
            }
        })
    });
    let on_error: STTErrorCallback = Arc::new(|error| {
        Box::pin(async move {
            eprintln!("error: {error}");
        })
    });
    stt.on_result(on_result).await?;
    stt.on_error(on_error).await?;

    stt.connect().await.context("Failed to connect to IBM Watson")?;
    info!(
        "Streaming {} bytes as {} in {}-byte chunks",
        audio.data.len(),
        audio.content_type,
        chunk_size
    );

    let data = Bytes::from(audio.data);
    for offset in (0..data.len()).step_by(chunk_size) {
        let end = (offset + chunk_size).min(data.len());
        stt.send_audio(data.slice(offset..end)).await?;
        if realtime {
            tokio::time::sleep(Duration::from_millis(chunk_ms)).await;
        }
    }

    let wait = config.session.drain_timeout + config.session.receiver_exit_timeout;
    if !stt.stop_and_wait(wait).await? {
        warn!("Service did not confirm the end of the request within {:?}", wait);
    }
    stt.disconnect().await?;

    match stt.termination() {
        Some(termination) if termination.is_failure() => {
            Err(anyhow!("Session ended abnormally: {termination}"))
        }
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    let config = ClientConfig::load(cli.config.as_deref()).context("Invalid configuration")?;

    match cli.command {
        Commands::Transcribe(args) => transcribe(config, args).await,
    }
}
