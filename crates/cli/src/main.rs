use clap::{Parser, Subcommand};
use lib::audio::{AudioCaptureStreamer, AudioEvent, CaptureDevice, CaptureState, FileCaptureDevice};
use lib::config::Config;
use lib::message::{Message, Sender};
use lib::mode::VideoIngestionState;
use lib::session::PROCESSING_WARNING;
use lib::{EngineError, ErrorKind, Session, ValidationError};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "wishva")]
#[command(about = "WishVA CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: WISHVA_CONFIG_PATH or ~/.wishva/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat with the backend (interactive). Type /help for commands.
    Chat {
        /// Config file path (default: WISHVA_CONFIG_PATH or ~/.wishva/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Backend base URL (overrides config; WISHVA_BACKEND_URL still wins)
        #[arg(long, short, value_name = "URL")]
        backend: Option<String>,

        /// Stream this recorded file instead of the microphone when /mic is toggled.
        #[arg(long, value_name = "PATH")]
        audio_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("wishva {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat {
            config,
            backend,
            audio_file,
        }) => {
            if let Err(e) = run_chat(config, backend, audio_file).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

const HELP: &str = "\
commands:
  <text>                       send a message
  /image <path>                stage a .jpg/.jpeg/.png image
  /video <path> [interval]     upload an .mp4 and wait for the backend
  /attach-video <name>         stage an already processed video by name
  /remove                      drop the staged attachment
  /remove-video                forget the active video, back to image chat
  /toggle                      switch Full Context / VectorDB Timestamp
  /reset                       clear chat history (here and on the backend)
  /mic                         start or stop live audio streaming
  /history                     print the transcript
  /status                      show mode, ingestion and audio state
  /exit                        quit";

async fn run_chat(
    config_path: Option<PathBuf>,
    backend: Option<String>,
    audio_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (mut config, _) = lib::config::load_config(config_path)?;
    if let Some(url) = backend {
        config.backend.base_url = url;
    }
    let session = Session::from_config(&config);
    let mut streamer = AudioCaptureStreamer::from_config(&config);
    spawn_audio_reporter(&streamer);
    log::info!(
        "session {} against {}",
        session.id(),
        lib::config::resolve_backend_url(&config)
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "[{}] > ", session.chat_mode().await)?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let (command, rest) = match input.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (input, ""),
        };

        let result = match command.to_ascii_lowercase().as_str() {
            "/exit" | "/quit" => break,
            "/help" => {
                println!("{}", HELP);
                Ok(())
            }
            "/image" => session.stage_image_file(Path::new(rest)).await,
            "/video" => ingest(&session, &config, rest).await,
            "/attach-video" => session.stage_video_reference(rest).await,
            "/remove" => {
                if !session.remove_attachment().await {
                    println!("nothing staged");
                }
                Ok(())
            }
            "/remove-video" => session.remove_video().await,
            "/toggle" => session.toggle_inference().await.map(|m| {
                println!("inference: {}", m);
            }),
            "/reset" => session.reset().await.map(|n| {
                println!("history cleared ({} messages)", n);
            }),
            "/mic" => {
                toggle_mic(&mut streamer, &config, audio_file.as_deref()).await;
                Ok(())
            }
            "/history" => {
                for m in session.transcript().await {
                    print_message(&m);
                }
                Ok(())
            }
            "/status" => {
                print_status(&session, &streamer).await;
                Ok(())
            }
            c if c.starts_with('/') => {
                println!("unknown command {} (try /help)", c);
                Ok(())
            }
            _ => session.send(input).await.map(|reply| print_message(&reply)),
        };
        if let Err(e) = result {
            report(&e);
        }
    }

    if let Err(e) = streamer.stop_capture().await {
        log::warn!("stopping audio on exit: {}", e);
    }
    Ok(())
}

async fn ingest(session: &Session, config: &Config, args: &str) -> Result<(), EngineError> {
    let mut parts = args.split_whitespace();
    let path = PathBuf::from(parts.next().unwrap_or_default());
    let interval = match parts.next().map(str::parse::<u32>) {
        Some(Ok(n)) => n,
        Some(Err(_)) => {
            println!("frame interval must be a number");
            return Ok(());
        }
        None => config.video.frame_interval,
    };
    println!("uploading {} (frameInterval={})...", path.display(), interval);
    match session.ingest_video_file(&path, interval).await? {
        VideoIngestionState::Processed => println!("video processed; history reset"),
        VideoIngestionState::Processing => println!(
            "backend is still processing; /video again to re-upload or /remove-video to cancel"
        ),
        VideoIngestionState::NotStarted => {}
    }
    Ok(())
}

fn capture_device(config: &Config, audio_file: Option<&Path>) -> Option<Box<dyn CaptureDevice>> {
    if let Some(path) = audio_file {
        return Some(Box::new(FileCaptureDevice::from_config(path, &config.audio)));
    }
    #[cfg(feature = "microphone")]
    {
        Some(Box::new(lib::audio::MicrophoneDevice::new()))
    }
    #[cfg(not(feature = "microphone"))]
    {
        None
    }
}

async fn toggle_mic(streamer: &mut AudioCaptureStreamer, config: &Config, audio_file: Option<&Path>) {
    if streamer.state() == CaptureState::Capturing {
        match streamer.stop_capture().await {
            Ok(Some(r)) => println!(
                "audio stopped: {} frames sent, {} lost",
                r.frames_sent, r.frames_lost
            ),
            Ok(None) => {}
            Err(e) => report(&e.into()),
        }
        return;
    }
    let Some(device) = capture_device(config, audio_file) else {
        println!("no capture device: pass --audio-file or build with --features microphone");
        return;
    };
    match streamer.start_capture(device).await {
        Ok(_) => println!("audio streaming started (/mic to stop)"),
        Err(e) => report(&e.into()),
    }
}

fn spawn_audio_reporter(streamer: &AudioCaptureStreamer) {
    let mut events = streamer.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let AudioEvent::SocketFailure(reason) = event {
                eprintln!("audio socket error: {} (capture continues)", reason);
            }
        }
    });
}

async fn print_status(session: &Session, streamer: &AudioCaptureStreamer) {
    println!("mode:      {}", session.chat_mode().await);
    println!("inference: {}", session.inference().await);
    println!("ingestion: {}", session.ingestion_state().await);
    if let Some(video) = session.active_video().await {
        println!("video:     {}", video);
    }
    if let Some(staged) = session.staged().await {
        println!(
            "staged:    {} {}",
            staged.attachment.kind(),
            staged.attachment.name()
        );
    }
    println!("audio:     {:?}", streamer.state());
    if let Some(w) = session.warning().await {
        println!("{}", w);
    }
}

fn print_message(m: &Message) {
    match m.sender {
        Sender::User => {
            let attachment = m
                .attachment_ref
                .as_ref()
                .map(|a| format!(" [{}: {}]", a.kind, a.name))
                .unwrap_or_default();
            println!("[{}] you: {}{}", m.timestamp, m.text, attachment);
        }
        Sender::Bot if m.is_placeholder() => println!("[{}] ...", m.timestamp),
        Sender::Bot => match m.response_time_seconds {
            Some(secs) => println!("[{}] < {} ({:.2}s)", m.timestamp, m.text.trim(), secs),
            None => println!("[{}] < {}", m.timestamp, m.text.trim()),
        },
    }
}

fn report(e: &EngineError) {
    match (e.kind(), e.as_validation()) {
        (_, Some(ValidationError::IngestionInProgress)) => println!("{}", PROCESSING_WARNING),
        (ErrorKind::ValidationFailure, _) => println!("refused: {}", e),
        (ErrorKind::NetworkFailure, _) => eprintln!("network error: {}", e),
        (ErrorKind::DeviceAccessFailure, _) => eprintln!("audio device error: {}", e),
        (ErrorKind::SocketFailure, _) => eprintln!("audio socket error: {}", e),
    }
}
