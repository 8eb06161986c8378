use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use teddy_realtime::camera::CommandFrameSource;
use teddy_realtime::client::consts::DEFAULT_CAPACITY;
use teddy_realtime::config::OPENAI_HTTP_BASE_URL;
use teddy_realtime::services::{FileWordList, FsConversationStore, HttpImageUploader, OpenAiVision, StaticWordList, WordListProvider};
use teddy_realtime::utils::device::{self, CpalInput, CpalOutput};
use teddy_realtime::{instructions, Client, Recording, Session, SessionConfig, TurnMode};

#[derive(Parser, Debug)]
#[command(version, about = "Talk to the realtime assistant from a terminal")]
struct Args {
    /// Input device name; the default device when omitted
    #[arg(long)]
    input: Option<String>,

    /// Output device name; the default device when omitted
    #[arg(long)]
    output: Option<String>,

    /// Print the audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Command that writes one JPEG to stdout, enables the camera loop
    #[arg(long)]
    camera_command: Option<String>,

    /// `manual` or `vad`, overrides TEDDY_TURN_MODE
    #[arg(long)]
    turn_mode: Option<TurnMode>,
}

const HELP: &str = "/r toggle recording, /vad or /manual switch turn mode, /camera toggle camera, \
/items, /events, /memory, /quit; anything else is sent as a message";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Args::parse();
    if args.list_devices {
        println!("Available inputs:\n{}", device::get_available_inputs()?);
        println!("Available outputs:\n{}", device::get_available_outputs()?);
        return Ok(());
    }

    let config = SessionConfig::from_env()?;
    let turn_mode = args.turn_mode.unwrap_or(config.turn_mode);

    let words: Box<dyn WordListProvider> = match &config.ng_words_file {
        Some(path) => Box::new(FileWordList::new(path)),
        None => Box::new(StaticWordList::default()),
    };
    let instructions = instructions::load(words.as_ref(), &config.user_id, instructions::BASE_INSTRUCTIONS).await;

    let vision = Arc::new(OpenAiVision::new(
        OPENAI_HTTP_BASE_URL,
        config.client.api_key().clone(),
        &config.vision_model,
    ));
    let mut builder = Session::builder(
        Box::new(Client::new(DEFAULT_CAPACITY, config.client)),
        Box::new(CpalInput::new(args.input)),
        Box::new(CpalOutput::new(args.output)),
    )
    .with_instructions(&instructions)
    .with_voice(config.voice)
    .with_turn_mode(turn_mode)
    .with_user_id(&config.user_id)
    .with_capture_interval(config.capture_interval)
    .with_store(Arc::new(FsConversationStore::new(&config.data_dir)))
    .with_vision(vision);
    if let Some(url) = &config.image_upload_url {
        builder = builder.with_uploader(Arc::new(HttpImageUploader::new(url, &config.user_id)));
    }
    let mut session = builder.build();

    session.connect().await?;
    println!("connected. {HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            input = session.next_input() => {
                let Some(input) = input else { break };
                if let Err(e) = session.handle(input).await {
                    eprintln!("session ended: {e}");
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let result = match line.trim() {
                    "" => Ok(()),
                    "/quit" => break,
                    "/r" if session.state().recording == Recording::Recording => session.stop_recording().await,
                    "/r" => session.start_recording().await,
                    "/vad" => session.set_turn_mode(TurnMode::VoiceActivity).await,
                    "/manual" => session.set_turn_mode(TurnMode::Manual).await,
                    "/camera" if session.camera_active() => {
                        session.stop_camera();
                        Ok(())
                    }
                    "/camera" => match args.camera_command.as_deref().and_then(CommandFrameSource::parse) {
                        Some(source) => session.start_camera(Box::new(source)),
                        None => {
                            println!("start with --camera-command to use the camera");
                            Ok(())
                        }
                    },
                    "/items" => {
                        for entry in session.items() {
                            let item = &entry.item;
                            println!(
                                "{:?} {:?} {} {} [{} images]",
                                item.role,
                                item.status,
                                item.id,
                                if item.formatted.transcript.is_empty() { &item.formatted.text } else { &item.formatted.transcript },
                                entry.images.len()
                            );
                        }
                        Ok(())
                    }
                    "/events" => {
                        for entry in session.events() {
                            println!(
                                "{} {:?} {} x{}",
                                session.event_log().display_time(entry),
                                entry.source,
                                entry.event_type().unwrap_or("?"),
                                entry.count.unwrap_or(1)
                            );
                        }
                        Ok(())
                    }
                    "/memory" => {
                        println!("{:?}", session.memory());
                        Ok(())
                    }
                    text => session.send_text(text).await,
                };
                if let Err(e) = result {
                    eprintln!("{e}");
                    if session.is_terminated() {
                        break;
                    }
                }
            }
        }
    }

    session.disconnect().await;
    Ok(())
}
