use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wayfarer::artifacts::{run_script, CdpReplayDriver, ReplayScript, TraceFile};
use wayfarer::browser::{BrowserSession, SessionConfig};
use wayfarer::config::AppConfig;
use wayfarer::events::{AgentEvent, EventBus};
use wayfarer::persona;
use wayfarer::run::RunController;
use wayfarer::RunOptions;

/// Autonomous web-journey agent.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level when RUST_LOG is not set.
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP control surface and operator event stream.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "8787")]
        port: u16,
    },
    /// Execute a single mission from the command line, without HTTP.
    Run {
        /// Target url.
        url: String,
        /// Mission for the agent.
        #[arg(short, long, default_value = "Explore the site and report what it offers.")]
        objective: String,
        /// Persona name.
        #[arg(short, long, default_value = "default")]
        persona: String,
        /// Vision model id.
        #[arg(short, long, default_value = wayfarer::config::DEFAULT_MODEL)]
        model: String,
        /// Show the browser window.
        #[arg(long)]
        headed: bool,
        /// Keep SoM marks visible in the operator stream.
        #[arg(long)]
        debug_marks: bool,
        /// Persist per-step screenshots.
        #[arg(long)]
        screenshots: bool,
        /// Pick actions uniformly at random instead of asking the model.
        #[arg(long)]
        monkey: bool,
        /// Neutral evidence-driven rules instead of the persona voice.
        #[arg(long)]
        bare: bool,
    },
    /// Re-drive a recorded trace against a live browser.
    Replay {
        /// Path to a trace json or replay script.
        trace: PathBuf,
        /// Show the browser window.
        #[arg(long)]
        headed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wayfarer={}", cli.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env();
    match cli.command {
        Commands::Serve { port } => wayfarer::server::serve(config, port).await,
        Commands::Run {
            url,
            objective,
            persona,
            model,
            headed,
            debug_marks,
            screenshots,
            monkey,
            bare,
        } => {
            let options = RunOptions {
                url,
                persona_name: persona,
                objective,
                model_name: model,
                headless_mode: !headed,
                debug_mode: debug_marks,
                save_screenshots: screenshots,
                monkey_mode: monkey,
                bare_mode: bare,
                ..RunOptions::default()
            };
            run_once(config, options).await
        }
        Commands::Replay { trace, headed } => replay(trace, headed).await,
    }
}

/// One-shot run: begin, mirror thoughts to the console, wait for the end.
async fn run_once(config: AppConfig, options: RunOptions) -> Result<()> {
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let controller = RunController::new(config, events.clone());
    let summary = controller.begin(options).context("run rejected")?;
    info!(run_id = %summary.run_id, "run accepted");
    while let Ok(event) = rx.recv().await {
        match event {
            AgentEvent::Thought { message, .. } => println!("  {message}"),
            AgentEvent::Step {
                id,
                action,
                target_id,
                ..
            } => {
                let target = target_id.map(|t| format!(" #{t}")).unwrap_or_default();
                println!("[{id}] {action}{target}");
            }
            AgentEvent::TraceSaved { path, .. } => println!("trace: {path}"),
            AgentEvent::ReportReady { paths, .. } => {
                for path in paths {
                    println!("report: {path}");
                }
            }
            AgentEvent::Status { state } => {
                if state == wayfarer::RunState::Stopped {
                    break;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Load a trace (or its replay script) and apply it to a fresh browser.
async fn replay(path: PathBuf, headed: bool) -> Result<()> {
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let script = match serde_json::from_str::<ReplayScript>(&raw) {
        Ok(script) => script,
        Err(_) => {
            let trace: TraceFile = serde_json::from_str(&raw)
                .context("file is neither a replay script nor a trace")?;
            ReplayScript::from_trace(&trace)
        }
    };
    info!(ops = script.ops.len(), run_id = %script.run_id, "replaying trace");

    let session = BrowserSession::launch(SessionConfig {
        headless: !headed,
        context: persona::resolve("default").context,
    })
    .await
    .context("browser launch failed")?;
    let mut driver = CdpReplayDriver::new(session);
    let applied = run_script(&script, &mut driver)
        .await
        .context("replay failed")?;
    driver.close().await;
    println!("replayed {applied} operations");
    Ok(())
}
