//! Command-line entrypoint for a tutoring session and progress maintenance.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use openai_realtime::{
    AudioSource, CredentialProvider, OggOpusFileSource, SilentSource, TokenBroker,
    WebRtcNegotiator,
};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tutor_core::{
    Notice, SessionController, SessionRequest,
    clock::{Clock, SystemClock},
    followup::FollowUpPolicy,
    level::Level,
    progress::{JsonFileProgressStore, ProgressStore, StudentId},
    session::ControllerSettings,
};
use tutor_service::{
    client::{HttpCredentialProvider, HttpEvaluator},
    commands,
    config::{ClientConfig, CredentialSource},
    runtime::SessionRuntime,
    scoring::{ScoringRequestor, request_for},
};

#[derive(Parser, Debug)]
#[command(name = "tutor")]
#[command(version)]
#[command(about = "Spoken-English tutoring sessions over the OpenAI Realtime API.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one live tutoring session, then score it
    Session {
        /// Student display name
        #[arg(short, long)]
        student: String,

        /// Override (and remember) the level: beginner, medium or advanced
        #[arg(short, long)]
        level: Option<Level>,

        /// Ogg/Opus file streamed as the microphone. Silent when omitted.
        #[arg(long)]
        audio: Option<PathBuf>,

        /// Skip scoring after the session
        #[arg(long)]
        no_score: bool,
    },
    /// Show stored progress
    Progress {
        #[arg(short, long)]
        student: String,
    },
    /// Set the level used by the next session
    Level {
        #[arg(short, long)]
        student: String,
        level: Level,
    },
    /// Restart the course from lesson 1
    Reset {
        #[arg(short, long)]
        student: String,
    },
    /// Delete the stored score history
    ClearHistory {
        #[arg(short, long)]
        student: String,
    },
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::State(state) => println!("[{}]", state),
        Notice::TimeLeft(left) => {
            let secs = left.as_secs();
            if secs % 60 == 0 || secs <= 10 {
                println!("Time left: {:02}:{:02}", secs / 60, secs % 60);
            }
        }
        Notice::LimitReached => println!("Session time is over. Great work today!"),
        Notice::Disconnected(reason) => println!("Disconnected: {}", reason),
        Notice::NudgeSent(n) => println!("(follow-up question {})", n),
        Notice::EngineError(message) => println!("Tutor engine error: {}", message),
        Notice::StoreFailed(message) => println!("Progress not saved: {}", message),
    }
}

async fn run_session(
    config: &ClientConfig,
    store: Arc<dyn ProgressStore>,
    student: String,
    level: Option<Level>,
    audio: Option<PathBuf>,
    no_score: bool,
) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let credentials: Arc<dyn CredentialProvider> = match config.credential_source {
        CredentialSource::Api => Arc::new(HttpCredentialProvider::new(config.api_url.clone())),
        CredentialSource::Local => Arc::new(
            TokenBroker::new(config.openai_api_key.clone())
                .with_api_base(config.openai_api_base.clone())
                .with_model(config.realtime_model.clone()),
        ),
    };
    let negotiator = Arc::new(
        WebRtcNegotiator::new()
            .with_api_base(config.openai_api_base.clone())
            .with_model(config.realtime_model.clone()),
    );
    let audio: Arc<dyn AudioSource> = match audio {
        Some(path) => Arc::new(OggOpusFileSource::new(path)),
        None => {
            warn!("No --audio file given: the tutor will not hear anything.");
            Arc::new(SilentSource::new())
        }
    };

    let controller = SessionController::new(
        store.clone(),
        clock.clone(),
        ControllerSettings {
            session_budget: config.session_budget,
            followup: FollowUpPolicy::default(),
        },
    );
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let mut runtime = SessionRuntime::new(
        controller,
        credentials,
        negotiator,
        audio,
        config.connect_timeout,
    )
    .with_notices(notice_tx);

    let printer = tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            print_notice(&notice);
        }
    });

    let (stop_tx, mut stop_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, stopping session");
            let _ = stop_tx.send(()).await;
        }
    });

    let request = SessionRequest {
        student_name: student,
        level,
    };
    let result = runtime.run(request, &mut stop_rx).await;
    drop(runtime);
    let _ = printer.await;
    let summary = result.context("Session failed")?;

    println!("\n{}", summary.transcript.render());
    if no_score {
        return Ok(());
    }

    let requestor = ScoringRequestor::new(
        Arc::new(HttpEvaluator::new(config.api_url.clone())),
        store,
        clock,
    );
    match requestor
        .submit(&summary.session.student, request_for(&summary))
        .await
    {
        Ok(record) => {
            let report = &record.report;
            println!("\nScores for {} ({})", report.student, report.lesson);
            println!(
                "  Pronunciation {}  Grammar {}  Fluency {}  Confidence {}  (avg {:.2})",
                report.scores.pronunciation,
                report.scores.grammar,
                report.scores.fluency,
                report.scores.confidence,
                report.scores.average()
            );
            println!("Strengths:");
            for s in &report.strengths {
                println!("  - {}", s);
            }
            println!("To improve:");
            for s in &report.improvements {
                println!("  - {}", s);
            }
            for pair in &report.corrected_pairs {
                println!("  \"{}\" -> \"{}\"", pair.student_said, pair.better);
            }
            println!("Homework: {}", report.homework);
        }
        Err(e) if e.is_policy_rejection() => println!("Not scored: {}", e),
        Err(e) => return Err(e).context("Scoring failed"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ClientConfig::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let store: Arc<dyn ProgressStore> = Arc::new(
        JsonFileProgressStore::new(&config.progress_dir)
            .context("Failed to open progress directory")?,
    );

    match cli.command {
        Commands::Session {
            student,
            level,
            audio,
            no_score,
        } => run_session(&config, store, student, level, audio, no_score).await?,
        Commands::Progress { student } => {
            let id = StudentId::from_name(&student);
            let progress = commands::load(store.as_ref(), &id)?;
            print!("{}", commands::render_progress(&id, &progress));
        }
        Commands::Level { student, level } => {
            commands::set_level(store.as_ref(), &StudentId::from_name(&student), level)?;
            println!("Level set to {}", level);
        }
        Commands::Reset { student } => {
            commands::reset_course(store.as_ref(), &StudentId::from_name(&student))?;
            println!("Course restarted from lesson 1");
        }
        Commands::ClearHistory { student } => {
            commands::clear_history(store.as_ref(), &StudentId::from_name(&student))?;
            println!("Score history cleared");
        }
    }
    Ok(())
}
