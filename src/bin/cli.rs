use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rustyline::Editor;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use omnilocal::inference::SpeechToText;
use omnilocal::orchestration::worker::{self, WorkerHandle};
use omnilocal::{AppConfig, History, OmniClient, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "omnilocal-cli", version, about = "Talk to OmniLocal from the terminal")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,

    /// Drive a running server instead of loading models in-process
    #[arg(long)]
    remote: Option<String>,

    /// Request timeout for --remote, in seconds
    #[arg(long, default_value_t = 600)]
    timeout: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Chat(String),
    Search(String),
    Image(String),
    Listen(String),
    Reset,
    Exit,
    Empty,
    Usage(&'static str),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if matches!(line.to_lowercase().as_str(), "exit" | "quit") {
        return Command::Exit;
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let path = rest.trim_matches(|c| c == '"' || c == '\'');
    match head {
        "/reset" => Command::Reset,
        "/search" if rest.is_empty() => Command::Usage("Usage: /search <question>"),
        "/search" => Command::Search(rest.to_string()),
        "/image" if path.is_empty() => Command::Usage("Usage: /image <path>"),
        "/image" => Command::Image(path.to_string()),
        "/listen" if path.is_empty() => Command::Usage("Usage: /listen <file.wav>"),
        "/listen" => Command::Listen(path.to_string()),
        _ => Command::Chat(line.to_string()),
    }
}

struct Reply {
    text: String,
    audio: PathBuf,
}

enum Backend {
    Local {
        worker: WorkerHandle,
        transcriber: Arc<dyn SpeechToText>,
        join: tokio::task::JoinHandle<()>,
    },
    Remote {
        client: OmniClient,
        audio_dir: PathBuf,
    },
}

impl Backend {
    async fn chat(&self, history: &History, input: &str, use_search: bool) -> omnilocal::Result<(Reply, History)> {
        match self {
            Backend::Local { worker, .. } => {
                let outcome = worker.chat(history.clone(), input, use_search).await?;
                Ok((
                    Reply {
                        text: outcome.response_text,
                        audio: outcome.audio_path,
                    },
                    outcome.history,
                ))
            }
            Backend::Remote { client, audio_dir } => {
                let resp = client.chat(history, input, use_search).await?;
                let audio = client.save_audio(&resp.audio_url, audio_dir).await?;
                Ok((
                    Reply {
                        text: resp.response_text,
                        audio,
                    },
                    resp.chat_history,
                ))
            }
        }
    }

    async fn caption(&self, image: &str, prompt: &str) -> omnilocal::Result<Reply> {
        match self {
            Backend::Local { worker, .. } => {
                let result = worker.caption(Some(PathBuf::from(image)), prompt).await?;
                Ok(Reply {
                    text: result.response_text,
                    audio: result.audio_path,
                })
            }
            Backend::Remote { client, audio_dir } => {
                let resp = client.vision(image, prompt).await?;
                let audio = client.save_audio(&resp.audio_url, audio_dir).await?;
                Ok(Reply {
                    text: resp.response_text,
                    audio,
                })
            }
        }
    }

    async fn transcribe(&self, audio: &Path) -> omnilocal::Result<String> {
        match self {
            Backend::Local { transcriber, .. } => transcriber.transcribe(audio).await,
            Backend::Remote { client, .. } => client.transcribe(audio).await,
        }
    }

    async fn shutdown(self) {
        if let Backend::Local { worker, join, .. } = self {
            println!("Releasing models...");
            let _ = worker.shutdown().await;
            let _ = join.await;
        }
    }
}

async fn connect(args: &Args, config: &AppConfig) -> anyhow::Result<Backend> {
    if let Some(url) = &args.remote {
        let client = OmniClient::new(url.as_str(), Duration::from_secs(args.timeout))?;
        let status = client.status().await?;
        println!("Connected to {} (text: {}, vision: {})", url, status.text_model, status.vision_model);
        return Ok(Backend::Remote {
            client,
            audio_dir: config.audio_dir.clone(),
        });
    }

    println!("Loading {}...", config.models.text);
    let mut orchestrator = Orchestrator::from_config(config)?;
    orchestrator.initialize().await?;
    let transcriber = orchestrator.transcriber();
    let (worker, join) = worker::spawn(orchestrator, 4);
    Ok(Backend::Local {
        worker,
        transcriber,
        join,
    })
}

fn print_reply(reply: &Reply) {
    println!("\nOmniLocal: {}", reply.text);
    println!("  [audio] {}\n", reply.audio.display());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "omnilocal=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;
    let backend = connect(&args, &config).await?;

    let mut rl = Editor::<()>::new()?;
    let mut history = History::new();
    println!("OmniLocal ready. Commands: /search <q>, /image <path>, /listen <wav>, /reset, exit");

    loop {
        let line = match rl.readline("You: ") {
            Ok(line) => line,
            Err(_) => break,
        };
        rl.add_history_entry(line.as_str());

        let (input, use_search) = match parse_command(&line) {
            Command::Empty => continue,
            Command::Exit => break,
            Command::Usage(usage) => {
                println!("{}", usage);
                continue;
            }
            Command::Reset => {
                history.clear();
                println!("History cleared.");
                continue;
            }
            Command::Image(path) => {
                let prompt = rl
                    .readline("Instruction (blank for a short description): ")
                    .unwrap_or_default();
                match backend.caption(&path, &prompt).await {
                    Ok(reply) => print_reply(&reply),
                    Err(e) => eprintln!("Error: {}", e),
                }
                continue;
            }
            Command::Listen(path) => match backend.transcribe(Path::new(&path)).await {
                Ok(text) if text.is_empty() => {
                    println!("(heard nothing)");
                    continue;
                }
                Ok(text) => {
                    println!("Heard: {}", text);
                    (text, false)
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    continue;
                }
            },
            Command::Search(query) => (query, true),
            Command::Chat(text) => (text, false),
        };

        match backend.chat(&history, &input, use_search).await {
            Ok((reply, updated)) => {
                history = updated;
                print_reply(&reply);
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    backend.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_recognized() {
        assert_eq!(parse_command("  "), Command::Empty);
        assert_eq!(parse_command("Quit"), Command::Exit);
        assert_eq!(parse_command("exit"), Command::Exit);
        assert_eq!(parse_command("/reset"), Command::Reset);
        assert_eq!(
            parse_command("/search latest rust release"),
            Command::Search("latest rust release".to_string())
        );
        assert_eq!(parse_command("/image  cat.jpg "), Command::Image("cat.jpg".to_string()));
        assert_eq!(parse_command("/listen q.wav"), Command::Listen("q.wav".to_string()));
        assert_eq!(
            parse_command("/image \"my photo.jpg\""),
            Command::Image("my photo.jpg".to_string())
        );
        assert_eq!(parse_command("/listen 'take 2.wav'"), Command::Listen("take 2.wav".to_string()));
        assert!(matches!(parse_command("/image \"\""), Command::Usage(_)));
    }

    #[test]
    fn missing_arguments_print_usage() {
        assert!(matches!(parse_command("/search"), Command::Usage(_)));
        assert!(matches!(parse_command("/image"), Command::Usage(_)));
        assert!(matches!(parse_command("/listen   "), Command::Usage(_)));
    }

    #[test]
    fn anything_else_is_chat() {
        assert_eq!(parse_command("What is 2+2?"), Command::Chat("What is 2+2?".to_string()));
        assert_eq!(parse_command("/unknown thing"), Command::Chat("/unknown thing".to_string()));
    }
}
