use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;

use uiproof::capture::{CaptureAdapter, CaptureOptions, CaptureStore, EventStep, select_adapter};
use uiproof::checklist::{self, AppKind, AppProfile};
use uiproof::fix::AutoFixer;
use uiproof::judge::{JudgeClient, JudgeConfig};
use uiproof::trigger;
use uiproof::verify::Orchestrator;
use uiproof::{BaselineStore, report};

/// uiproof - automated visual verification with LLM judging
#[derive(Parser, Debug)]
#[command(
    name = "uiproof",
    about = "Verify running web, GUI, and terminal applications against a checklist",
    after_help = "ENVIRONMENT VARIABLES:\n\
        UIPROOF_JUDGE_BIN           Judge CLI binary (default: claude)\n\
        UIPROOF_JUDGE_MODEL         Judge model name\n\
        UIPROOF_JUDGE_TIMEOUT       Judge call timeout in seconds\n\
        UIPROOF_SESSION_DIR         Base directory for evidence sessions\n\
        UIPROOF_DEFAULT_SIZE        Default terminal size preset\n\
        UIPROOF_FIX_MAX_ATTEMPTS    Auto-fix attempt bound\n\
        UIPROOF_FIX_MIN_CONFIDENCE  Minimum proposal confidence"
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify a task file's pending checklist items against the running app
    Verify {
        /// Path to the task markdown file
        task: PathBuf,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Capture a target once (URL, window:<title>, tui:<command>, or shell command)
    Capture {
        /// Target to capture
        target: String,

        /// Output directory for the capture
        #[arg(short, long, default_value = "./captures")]
        output: PathBuf,

        /// Viewport width in pixels
        #[arg(short = 'W', long, default_value = "1280")]
        width: u32,

        /// Viewport height in pixels
        #[arg(short = 'H', long, default_value = "720")]
        height: u32,

        /// Event steps to run before capturing, comma-separated
        /// (e.g. "click:#login,input:#user=me,screenshot")
        #[arg(short, long)]
        events: Option<String>,
    },

    /// Manage baseline captures for regression comparison
    Baseline {
        #[command(subcommand)]
        command: BaselineCommands,
    },

    /// Verify and, on failure, propose and apply fixes up to the attempt bound
    Fix {
        /// Path to the task markdown file
        task: PathBuf,

        /// Project root containing the source files
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Recently edited files the judge may propose fixes in
        #[arg(short, long, value_delimiter = ',')]
        edited: Vec<String>,
    },

    /// Check whether a todo list warrants verification now
    Trigger {
        /// Path to a file with todos (markdown checkboxes or JSON)
        todos: PathBuf,
    },

    /// Manage the store of accepted captures
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
}

#[derive(Subcommand, Debug)]
enum BaselineCommands {
    /// Capture current state and save it as a named baseline
    Save {
        /// Baseline name
        name: String,

        /// Task file declaring the application under test
        task: PathBuf,

        /// Optional human description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List saved baselines
    List,

    /// Compare current state to a named baseline
    Compare {
        /// Baseline name
        name: String,

        /// Existing capture to compare instead of capturing fresh state
        #[arg(short, long)]
        current: Option<PathBuf>,
    },

    /// Delete a named baseline
    Delete {
        /// Baseline name
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum StoreCommands {
    /// List accepted captures
    List,

    /// Accept a capture file into the store
    Add {
        /// Path to the capture file
        path: PathBuf,

        /// Event that produced the capture
        #[arg(short, long, default_value = "")]
        event: String,

        /// Source tag
        #[arg(short, long, default_value = "external")]
        source: String,
    },

    /// Import new files from a watched directory
    Sweep {
        /// Directory to sweep
        dir: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let judge = JudgeClient::new(JudgeConfig::default());

    match args.command {
        Commands::Verify { task, json } => {
            let project = task
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "verify".to_string());
            let orchestrator = Orchestrator::new(judge).project(&project);
            let result = orchestrator.verify_task_file(&task)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", report::format_verification(&result));
            }
            if !result.success {
                std::process::exit(1);
            }
        }

        Commands::Capture {
            target,
            output,
            width,
            height,
            events,
        } => {
            let options = CaptureOptions::default()
                .output_dir(&output)
                .size(width, height);
            let mut adapter = select_adapter(&target, options);

            let results = match events {
                Some(events) => {
                    let steps: Vec<EventStep> = events
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(EventStep::parse)
                        .collect();
                    if !adapter.start_session(&target) {
                        eprintln!("Warning: no persistent session for {}; continuing one-shot", target);
                    }
                    let results = adapter.capture_sequence(&target, &steps, None);
                    adapter.end_session();
                    results
                }
                None => vec![adapter.capture(&target, None)],
            };

            for result in &results {
                let label = result.event.as_deref().unwrap_or("capture");
                if result.success {
                    let location = result
                        .content_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "<inline>".to_string());
                    println!("{}: {}", label, location);
                } else {
                    eprintln!(
                        "{}: FAILED - {}",
                        label,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            if results.iter().any(|r| !r.success) {
                std::process::exit(1);
            }
        }

        Commands::Baseline { command } => {
            let store = BaselineStore::open(".", judge)?;
            match command {
                BaselineCommands::Save {
                    name,
                    task,
                    description,
                } => {
                    let profile = load_profile(&task)?;
                    let entry = store.save(&name, &profile, description.as_deref())?;
                    println!("Baseline saved: {}", entry.file);
                }
                BaselineCommands::List => {
                    println!("{}", report::format_baseline_list(&store.list()));
                }
                BaselineCommands::Compare { name, current } => {
                    let result = store.compare(&name, current.as_deref())?;
                    println!("{}", report::format_comparison(&result));
                    if !result.matches {
                        std::process::exit(1);
                    }
                }
                BaselineCommands::Delete { name } => {
                    if store.delete(&name)? {
                        println!("Baseline '{}' deleted.", name);
                    } else {
                        println!("Baseline '{}' not found.", name);
                    }
                }
            }
        }

        Commands::Fix { task, root, edited } => {
            let content = std::fs::read_to_string(&task)?;
            let parsed = checklist::parse_task_str(&content);
            let items = parsed.pending_texts();
            if items.is_empty() {
                println!("Nothing to fix: no pending checklist items.");
                return Ok(());
            }

            let project = task
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "fix".to_string());
            let orchestrator = Orchestrator::new(judge.clone()).project(&project);
            let fixer = AutoFixer::new(&root, judge);
            let outcome = fixer.run(
                &orchestrator,
                &content,
                &items,
                parsed.acceptance_criteria.as_deref(),
                &edited,
            );

            println!("{}", report::format_fix_outcome(&outcome));
            if !outcome.all_fixed {
                std::process::exit(1);
            }
        }

        Commands::Trigger { todos } => {
            let content = std::fs::read_to_string(&todos)?;
            let items = trigger::parse_todos_from_text(&content);
            let decision = trigger::should_verify(&items);
            println!("{}", report::format_trigger(&decision));
        }

        Commands::Store { command } => {
            let mut store = CaptureStore::open("./.uiproof/captures")?;
            match command {
                StoreCommands::List => {
                    let records = store.all();
                    if records.is_empty() {
                        println!("No captures in store.");
                    }
                    for record in records {
                        let status = if record.verified { "verified" } else { "pending" };
                        println!(
                            "{}  {}  [{}] {}",
                            record.id, status, record.source, record.stored_path
                        );
                    }
                }
                StoreCommands::Add {
                    path,
                    event,
                    source,
                } => {
                    let record = store.add(&path, &event, "", &source, Vec::new())?;
                    println!("Accepted capture {} -> {}", record.id, record.stored_path);
                }
                StoreCommands::Sweep { dir } => {
                    let imported = store.sweep(&dir, "watcher")?;
                    println!("Imported {} capture(s).", imported);
                }
            }
        }
    }

    Ok(())
}

/// Read a task file and require a usable application profile
fn load_profile(task: &PathBuf) -> Result<AppProfile, Box<dyn Error>> {
    let content = std::fs::read_to_string(task)?;
    let profile = checklist::detect_app_profile(&content).ok_or(
        "task file does not declare an application; add [webapp]: URL, [gui]: command, or [tui]: command",
    )?;
    match profile.kind {
        AppKind::Web if profile.url.is_none() => {
            Err("webapp declared without a URL".into())
        }
        AppKind::Gui | AppKind::Terminal if profile.command.is_none() && profile.window_title.is_none() => {
            Err("application declared without a command".into())
        }
        _ => Ok(profile),
    }
}
