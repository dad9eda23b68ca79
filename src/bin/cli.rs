use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use math_mentor::api::{Credentials, Difficulty, NewTrainingData, Registration};
use math_mentor::realtime::{EventData, TrainingStatus};
use math_mentor::views::{ChatFeed, ConnectionWatch, TrainingMonitor, TrainingPhase};
use math_mentor::{
    ApiClient, ApiError, ClientConfig, Event, EventBus, EventKind, SessionStore, WsTransport,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "mentor")]
#[command(about = "Command-line client for the Math Mentor tutoring service", version)]
#[command(after_help = "Configuration:
   MATH_MENTOR_API_URL                REST base (default http://localhost:5000/api)
   MATH_MENTOR_WS_URL                 realtime service root (default http://localhost:5000)
   MATH_MENTOR_HOME                   session and config.toml directory (default ~/.math-mentor)
   MATH_MENTOR_REQUEST_TIMEOUT_SECS   per-request timeout (default 30)
   MATH_MENTOR_CONNECT_TIMEOUT_SECS   connect timeout (default 20)
   RUST_LOG                           log filter (default warn)")]
struct Cli {
    /// Also write daily log files into this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the service is up
    Health,

    /// Create an account and sign in
    Register {
        username: String,
        email: String,

        #[arg(long)]
        password: String,
    },

    /// Sign in and remember the token
    Login {
        email: String,

        #[arg(long)]
        password: String,
    },

    /// Forget the stored token
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Solve a problem step by step
    Solve {
        #[arg(required = true, num_args = 1..)]
        problem: Vec<String>,
    },

    /// Show previously solved problems
    History {
        #[arg(short, long, default_value_t = 1)]
        page: u32,

        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },

    /// Contribute training data and manage training runs
    Train {
        #[command(subcommand)]
        action: TrainCommands,
    },

    /// Chat with the tutor over the realtime link
    Chat,
}

#[derive(Subcommand)]
enum TrainCommands {
    /// Contribute a worked example
    Add {
        /// Problem statement
        problem: String,

        /// Final solution
        solution: String,

        /// Comma-separated concepts, e.g. algebra,linear-equations
        #[arg(short, long, value_delimiter = ',', required = true)]
        concepts: Vec<String>,

        /// Step-by-step explanation
        #[arg(short, long)]
        steps: Option<String>,

        #[arg(short, long, default_value = "intermediate")]
        difficulty: Difficulty,

        /// Contributor name (defaults to the signed-in user)
        #[arg(long)]
        contributor: Option<String>,
    },

    /// List contributed examples
    List {
        #[arg(short, long, default_value_t = 1)]
        page: u32,

        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },

    /// Show the current training status
    Status,

    /// Start a retraining run
    Start {
        /// Ask over the realtime link and follow progress
        #[arg(long)]
        realtime: bool,
    },

    /// Follow training events until the run ends (Ctrl-C to stop)
    Watch,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let guard = init_logging(cli.log_dir.as_deref());

    if let Err(e) = run(cli.command).await {
        tracing::debug!("command failed: {e:?}");
        match e.downcast_ref::<ApiError>() {
            Some(api) => {
                eprintln!("{} {}", "✗".red(), api.user_message());
                eprintln!("  {}", api.to_string().bright_black());
            }
            None => eprintln!("{} {:#}", "✗".red(), e),
        }
        // exit() skips destructors; flush the file log first
        drop(guard);
        std::process::exit(1);
    }
}

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter());

    match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "mentor.log"));
            let file = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            tracing_subscriber::registry().with(stderr).with(file).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(stderr).init();
            None
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    let config = ClientConfig::from_env()?;
    let session = Arc::new(SessionStore::open(config.session_path()));
    let api = ApiClient::new(&config, session.clone())?;

    match command {
        Commands::Health => {
            let report = api.health().await?;
            let marker = if report.is_healthy() {
                "●".bright_green()
            } else {
                "●".bright_red()
            };
            println!(
                "{} {} {}",
                marker,
                report.status.bold(),
                report.version.as_deref().unwrap_or("").bright_black()
            );
            for (service, state) in &report.services {
                let state = state.as_str().map(str::to_string).unwrap_or_else(|| state.to_string());
                println!("   {:<10} {}", service.bright_black(), state);
            }
        }

        Commands::Register {
            username,
            email,
            password,
        } => {
            let registration = Registration {
                username,
                email,
                password,
            };
            reject_invalid(&registration.validate())?;
            let auth = api.register(&registration).await?;
            println!(
                "{} {}",
                "✓".green(),
                auth.message.as_deref().unwrap_or("Registered")
            );
        }

        Commands::Login { email, password } => {
            let auth = api.login(&Credentials { email, password }).await?;
            let who = auth
                .user
                .map(|u| u.username)
                .unwrap_or_else(|| "unknown user".to_string());
            println!("{} Signed in as {}", "✓".green(), who.bright_cyan().bold());
        }

        Commands::Logout => {
            api.logout()?;
            println!("{} Signed out", "✓".green());
        }

        Commands::Whoami => match session.user() {
            Some(user) => {
                println!("{} (#{})", user.username.bright_cyan().bold(), user.id);
                if let Some(email) = user.email {
                    println!("   {}", email.bright_black());
                }
            }
            None if session.is_logged_in() => println!("{}", "Signed in (no profile cached)".yellow()),
            None => println!("{}", "Not signed in".yellow()),
        },

        Commands::Solve { problem } => {
            let problem = problem.join(" ");
            let response = api.solve(&problem).await?;
            let solution = response.solution;

            println!("{}", problem.cyan().bold());
            println!("{}", "─".repeat(60).bright_black());
            for (i, step) in solution.steps.iter().enumerate() {
                println!("{:>3}. {}", i + 1, step);
            }
            if let Some(answer) = &solution.final_answer {
                println!("\n{} {}", "Answer:".green().bold(), answer);
            }
            if !solution.concepts.is_empty() {
                println!("{} {}", "Concepts:".bright_black(), solution.concepts.join(", "));
            }
            if let Some(confidence) = solution.confidence {
                println!("{} {:.0}%", "Confidence:".bright_black(), confidence * 100.0);
            }
        }

        Commands::History { page, limit } => {
            let Some(user) = session.user() else {
                bail!("sign in first: mentor login <email> --password <password>");
            };
            let history = api.solution_history(user.id, page, limit).await?;
            if history.data.is_empty() {
                println!("{}", "No solved problems yet.".yellow());
            }
            for entry in &history.data {
                println!(
                    "{} {}",
                    "●".bright_green(),
                    entry.problem_text.bright_white()
                );
                if let Some(at) = &entry.created_at {
                    println!("   {}", at.bright_black());
                }
            }
            print_pagination(history.pagination.page, history.pagination.pages, history.pagination.total);
        }

        Commands::Train { action } => train(action, &config, &api, session).await?,

        Commands::Chat => chat(&config, session).await?,
    }

    Ok(())
}

async fn train(
    action: TrainCommands,
    config: &ClientConfig,
    api: &ApiClient,
    session: Arc<SessionStore>,
) -> Result<()> {
    match action {
        TrainCommands::Add {
            problem,
            solution,
            concepts,
            steps,
            difficulty,
            contributor,
        } => {
            let contributed_by = contributor
                .or_else(|| session.user().map(|u| u.username))
                .unwrap_or_else(|| "Anonymous".to_string());
            let data = NewTrainingData {
                problem_text: problem,
                solution_text: solution,
                mathematical_concepts: concepts,
                step_by_step_explanation: steps.unwrap_or_default(),
                difficulty_level: difficulty,
                contributed_by,
            };
            reject_invalid(&data.validate())?;

            let submitted = api.submit_training_data(&data).await?;
            println!(
                "{} {} (#{})",
                "✓".green(),
                submitted.message.as_deref().unwrap_or("Training data added"),
                submitted.id
            );
        }

        TrainCommands::List { page, limit } => {
            let listing = api.training_data(page, limit).await?;
            println!("{}", "📚 Training Data".cyan().bold());
            println!("{}", "═".repeat(80).bright_black());
            for record in &listing.data {
                println!(
                    "{} {} {}",
                    format!("#{}", record.id).bright_black(),
                    record.problem_text.bright_white(),
                    format!("[{}]", record.difficulty_level.as_deref().unwrap_or("?")).yellow()
                );
                if !record.mathematical_concepts.is_empty() {
                    println!("   {} {}", "Concepts:".bright_black(), record.mathematical_concepts.join(", "));
                }
                if let Some(by) = &record.contributed_by {
                    println!("   {} {}", "By:      ".bright_black(), by);
                }
            }
            println!("{}", "─".repeat(80).bright_black());
            print_pagination(listing.pagination.page, listing.pagination.pages, listing.pagination.total);
        }

        TrainCommands::Status => {
            let status = api.training_status().await?;
            print_training(TrainingPhase::of(&status), &status);
        }

        TrainCommands::Start { realtime: false } => {
            let started = api.retrain().await?;
            println!(
                "{} {} {}",
                "✓".green(),
                started.message.as_deref().unwrap_or("Model training started"),
                started.training_id.unwrap_or_default().bright_black()
            );
        }

        TrainCommands::Start { realtime: true } => {
            let bus = connect(config, session).await?;
            let monitor = TrainingMonitor::new(&bus);
            if let Ok(status) = api.training_status().await {
                monitor.seed(&status);
            }
            if !monitor.start() {
                bus.disconnect();
                bail!("training is already in progress");
            }
            println!("{}", "🔄 Training requested".cyan().bold());
            follow_training(&bus, &monitor).await;
            bus.disconnect();
        }

        TrainCommands::Watch => {
            let bus = connect(config, session).await?;
            let monitor = TrainingMonitor::new(&bus);
            if let Ok(status) = api.training_status().await {
                monitor.seed(&status);
            }
            print_training(monitor.phase(), &monitor.status());
            follow_training(&bus, &monitor).await;
            bus.disconnect();
        }
    }

    Ok(())
}

/// Connect a bus with the stored credential and wait for the handshake.
async fn connect(config: &ClientConfig, session: Arc<SessionStore>) -> Result<EventBus> {
    let transport = WsTransport::new(&config.ws_url, config.connect_timeout)
        .context("invalid realtime url")?;
    let bus = EventBus::with_credentials(transport, session);
    let watch = ConnectionWatch::new(&bus);

    bus.connect();
    if !watch.wait_connected(config.connect_timeout).await {
        bus.disconnect();
        bail!("could not connect to {}", config.ws_url);
    }
    Ok(bus)
}

async fn follow_training(bus: &EventBus, monitor: &TrainingMonitor) {
    let mut events = bus.subscribe();
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    if !print_training_event(&event, monitor) {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

/// Returns false once there is nothing more worth waiting for.
fn print_training_event(event: &Event, monitor: &TrainingMonitor) -> bool {
    match event.data() {
        EventData::Training(_) => {
            print_training(monitor.phase(), &monitor.status());
            !matches!(
                monitor.phase(),
                TrainingPhase::Completed | TrainingPhase::Failed
            )
        }
        EventData::TrainingDataAdded(notice) => {
            println!(
                "{} {} {}",
                "+".bright_green(),
                notice.problem_text.as_deref().unwrap_or("new example"),
                format!("by {}", notice.contributor.as_deref().unwrap_or("Anonymous")).bright_black()
            );
            true
        }
        EventData::Disconnected(down) => {
            println!("{} {}", "✗ Disconnected:".red(), down.reason);
            false
        }
        _ => true,
    }
}

fn print_training(phase: TrainingPhase, status: &TrainingStatus) {
    let (icon, label) = match phase {
        TrainingPhase::Training => ("🔄", phase.label().yellow()),
        TrainingPhase::Completed => ("✅", phase.label().green()),
        TrainingPhase::Failed => ("❌", phase.label().red()),
        TrainingPhase::Idle => ("🤖", phase.label().normal()),
    };

    println!("{} {} {}", icon, label.bold(), progress_bar(status.percent()));
    println!(
        "   {}",
        status.message.as_deref().unwrap_or("No training activity").bright_black()
    );
    if let Some(id) = &status.training_id {
        println!("   {} {}", "Run:".bright_black(), id);
    }
}

fn progress_bar(percent: f64) -> String {
    const WIDTH: usize = 30;
    let filled = ((percent / 100.0) * WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:>3.0}%",
        "█".repeat(filled.min(WIDTH)),
        "░".repeat(WIDTH - filled.min(WIDTH)),
        percent
    )
}

fn print_pagination(page: u32, pages: u64, total: u64) {
    println!(
        "{}",
        format!("page {page} of {} ({total} total)", pages.max(1)).bright_black()
    );
}

fn reject_invalid(errors: &[(&str, &str)]) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    for (field, message) in errors {
        eprintln!("{} {}: {}", "•".yellow(), field.bold(), message);
    }
    bail!("Please check your input and try again.");
}

async fn chat(config: &ClientConfig, session: Arc<SessionStore>) -> Result<()> {
    let bus = connect(config, session).await?;
    let feed = ChatFeed::new(&bus);

    let _printer = bus.listen_all(
        [EventKind::ChatResponse, EventKind::ChatError, EventKind::Disconnect],
        |event| match event.data() {
            EventData::ChatResponse(reply) => {
                let text = reply
                    .solution
                    .clone()
                    .unwrap_or_else(|| event.payload().to_string());
                println!("{} {}", "tutor>".bright_cyan().bold(), text);
                if let Some(confidence) = reply.confidence {
                    println!("       {}", format!("confidence {:.0}%", confidence * 100.0).bright_black());
                }
            }
            EventData::ChatError(failure) => {
                let text = failure.error.as_deref().unwrap_or("Failed to process message");
                println!("{} {}", "error>".red().bold(), text);
            }
            EventData::Disconnected(down) => {
                println!("{} {}", "✗ Disconnected:".red(), down.reason);
            }
            _ => {}
        },
    );

    println!(
        "{} {}",
        "✓ Connected.".green(),
        "Type a problem and press Enter; /quit or Ctrl-D to leave.".bright_black()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        if line.is_empty() {
            continue;
        }
        if !feed.submit(line) {
            println!("{}", "Not connected; message not sent.".yellow());
            break;
        }
        // Give the reply a moment before showing the next prompt
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    bus.disconnect();
    Ok(())
}
