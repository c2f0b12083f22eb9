//! Conductor CLI: orchestrate concurrent agent sessions in tmux windows.

use std::env;
use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use conductor::abort::abort_session;
use conductor::complete::{CompletionOutcome, complete_session};
use conductor::core::session::SessionState;
use conductor::exit_codes;
use conductor::io::config::load_config;
use conductor::io::context::TmuxContext;
use conductor::io::lru::LruCache;
use conductor::io::project;
use conductor::io::store::SessionStore;
use conductor::io::summarize::AgentCliSummarizer;
use conductor::logging;
use conductor::looping::{CheckerSpec, LoopOutcome, LoopParams, run_loop};
use conductor::resume::{ResumeOutcome, resume_session};
use conductor::spawn::{OpsEnv, SpawnRequest, spawn_session};
use conductor::status::poll_sessions;
use conductor::wait::wait_sessions;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Orchestrate concurrent agent sessions in tmux windows"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Spawn a new session running the agent on a task.
    Spawn {
        /// One-line description of what the session should accomplish.
        task: String,
        /// Unique human-friendly label for the session.
        #[arg(long)]
        alias: Option<String>,
        /// Sessions (ids or aliases) to wait for before starting work.
        #[arg(long = "after", value_delimiter = ',')]
        after: Vec<String>,
        /// Verification criteria listed in the contract (repeatable).
        #[arg(long = "verify")]
        verify: Vec<String>,
        /// Checker: a shell command, or "agent:<review instruction>".
        #[arg(long)]
        checker: Option<String>,
        /// Iteration budget for the doer/checker loop.
        #[arg(long, default_value_t = 3)]
        max_iterations: u32,
        /// Model override for agent checkers.
        #[arg(long)]
        checker_model: Option<String>,
        /// Spawn only; do not supervise even when a checker is given.
        #[arg(long)]
        no_loop: bool,
    },
    /// Block until sessions are terminal and print their results.
    Wait {
        /// Session ids or aliases.
        #[arg(required = true)]
        references: Vec<String>,
        /// Print one summarized status line per session instead of results.
        #[arg(long)]
        summary: bool,
    },
    /// Print one JSON status line per session (never the result text).
    Poll {
        /// Session ids or aliases.
        references: Vec<String>,
        /// All sessions in this project.
        #[arg(long)]
        all: bool,
    },
    /// Abort a session and all of its descendants.
    Abort {
        /// Session id or alias.
        reference: String,
    },
    /// Resume a done or evicted session in a fresh window.
    Resume {
        /// Session id or alias.
        reference: String,
    },
    /// Record a session outcome (driven by lifecycle hooks).
    Complete {
        /// Session id or alias.
        reference: String,
        /// Terminal state: done, failed, or exited.
        #[arg(long)]
        state: String,
        /// Result text, or "-" to read it from stdin.
        #[arg(long)]
        result: Option<String>,
        /// Why the session failed.
        #[arg(long)]
        failed_reason: Option<String>,
        /// External conversation id of the agent process, for `resume`.
        #[arg(long)]
        agent_id: Option<String>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let workdir = env::current_dir().context("determine working directory")?;
    let project_id = project::project_identifier(&workdir);
    let base = project::data_dir()?;
    let global = project::global_dir()?;
    let config = load_config(&global)?;
    let store = SessionStore::new(&base);
    let lru = LruCache::new(&global);
    let ctx = TmuxContext::new(&workdir);
    let summarizer = AgentCliSummarizer::new(&config.agent_command, config.summary_timeout_secs);
    let env = OpsEnv {
        store: &store,
        ctx: &ctx,
        summarizer: &summarizer,
        config: &config,
        project_id: &project_id,
        workdir,
    };

    match cli.command {
        Command::Spawn {
            task,
            alias,
            after,
            verify,
            checker,
            max_iterations,
            checker_model,
            no_loop,
        } => cmd_spawn(
            &env,
            SpawnArgs {
                task,
                alias,
                after,
                verify,
                checker,
                max_iterations,
                checker_model,
                no_loop,
            },
        ),
        Command::Wait {
            references,
            summary,
        } => {
            let report = wait_sessions(&env, &lru, &references, summary)?;
            for output in &report.outputs {
                println!("{output}");
            }
            Ok(report.exit_code)
        }
        Command::Poll { references, all } => {
            for status in poll_sessions(&store, &references, all)? {
                println!("{}", serde_json::to_string(&status)?);
            }
            Ok(exit_codes::OK)
        }
        Command::Abort { reference } => {
            let result = abort_session(&env, &lru, &reference)?;
            for warning in &result.warnings {
                eprintln!("warning: {warning}");
            }
            for id in &result.aborted_ids {
                println!("aborted {id}");
            }
            Ok(exit_codes::OK)
        }
        Command::Resume { reference } => {
            match resume_session(&env, &lru, &reference)? {
                ResumeOutcome::Resumed { id } => println!("resumed {id}"),
                ResumeOutcome::StillMaterialized { id } => {
                    println!("recovered {id} (window was still materialized)");
                }
            }
            Ok(exit_codes::OK)
        }
        Command::Complete {
            reference,
            state,
            result,
            failed_reason,
            agent_id,
        } => {
            let state: SessionState = state.parse()?;
            let result = match result.as_deref() {
                Some("-") => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("read result from stdin")?;
                    Some(buf)
                }
                Some(text) => Some(text.to_string()),
                None => None,
            };
            let outcome = CompletionOutcome {
                result,
                failed_reason,
                agent_id,
            };
            complete_session(&env, &lru, &reference, state, &outcome)?;
            Ok(exit_codes::OK)
        }
    }
}

struct SpawnArgs {
    task: String,
    alias: Option<String>,
    after: Vec<String>,
    verify: Vec<String>,
    checker: Option<String>,
    max_iterations: u32,
    checker_model: Option<String>,
    no_loop: bool,
}

fn cmd_spawn(env: &OpsEnv<'_>, args: SpawnArgs) -> Result<i32> {
    let checker = args
        .checker
        .as_deref()
        .map(CheckerSpec::parse)
        .transpose()?;

    let mut request = SpawnRequest::new(&args.task, &project::parent_from_env());
    request.alias = args.alias.unwrap_or_default();
    request.depends_on = args.after;
    request.verify = args.verify;
    let id = spawn_session(env, &request)?;
    println!("{id}");

    let Some(checker) = checker else {
        return Ok(exit_codes::OK);
    };
    if args.no_loop {
        return Ok(exit_codes::OK);
    }

    let params = LoopParams {
        checker,
        max_iterations: args.max_iterations,
        checker_model: args.checker_model,
    };
    match run_loop(env, &id, &params)? {
        LoopOutcome::Accepted {
            iterations,
            feedback,
        } => {
            println!("accepted after {iterations} iteration(s)");
            if !feedback.is_empty() {
                println!("{feedback}");
            }
            Ok(exit_codes::OK)
        }
        LoopOutcome::Terminated {
            iterations,
            feedback,
        } => {
            eprintln!("terminated by checker after {iterations} iteration(s): {feedback}");
            Ok(exit_codes::INVALID)
        }
        LoopOutcome::MaxIterationsReached {
            iterations,
            last_feedback,
        } => {
            eprintln!("not accepted after {iterations} iteration(s); last feedback: {last_feedback}");
            Ok(exit_codes::INVALID)
        }
        LoopOutcome::DoerFailed {
            doer_session_id,
            state,
        } => {
            eprintln!("doer session {doer_session_id} ended {state}; nothing to check");
            Ok(exit_codes::FAILED)
        }
    }
}
