//! Claude Runner - drive the Claude Code CLI from the terminal.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_runner::cli::{ClaudeCli, InputBridge, InvokeOptions, StreamHooks};
use claude_runner::config::{ConfigLoader, RunnerConfig};
use claude_runner::display;
use claude_runner::supervisor::{
    KillSwitch, RunCallbacks, RunMode, RunRequest, RunStatus, StreamingRunner,
};

#[derive(Parser)]
#[command(
    name = "claude-runner",
    about = "Run Claude Code tasks as one-shot calls or streaming sessions",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question and print the answer.
    Ask {
        /// The prompt to send.
        prompt: String,
        /// Use stream-json output and print the session id.
        #[arg(long)]
        stream: bool,
        /// Model to use.
        #[arg(short, long)]
        model: Option<String>,
        /// Wall-clock timeout in seconds.
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Session to resume.
        #[arg(long)]
        resume: Option<String>,
    },
    /// Run a task through a streaming session.
    ///
    /// Lines typed on stdin are sent as follow-up messages. `/approve <id>`,
    /// `/reject <id> [feedback]` and `/answer <tool_use_id> <text>` answer
    /// plan and question prompts.
    Run {
        /// The task to execute.
        task: String,
        /// Enable multi-agent team mode.
        #[arg(long)]
        team: bool,
        /// Session to resume.
        #[arg(long)]
        resume: Option<String>,
        /// Working directory for the session.
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<RunnerConfig, ExitCode> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    loader.load().map_err(|e| {
        display::print_error(&e.to_string());
        ExitCode::from(2)
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(cli.config) {
        Ok(config) => config,
        Err(code) => return code,
    };

    match cli.command {
        Commands::Ask {
            prompt,
            stream,
            model,
            timeout,
            resume,
        } => ask(&config, &prompt, stream, model, timeout, resume).await,
        Commands::Run {
            task,
            team,
            resume,
            cwd,
        } => run(&config, task, team, resume, cwd).await,
    }
}

async fn ask(
    config: &RunnerConfig,
    prompt: &str,
    stream: bool,
    model: Option<String>,
    timeout: Option<u64>,
    resume: Option<String>,
) -> ExitCode {
    let client = ClaudeCli::from_config(&config.cli);
    let mut options = InvokeOptions::new();
    if let Some(model) = model {
        options = options.model(model);
    }
    if let Some(secs) = timeout {
        options = options.timeout(Duration::from_secs(secs));
    }
    if let Some(id) = resume {
        options = options.resume(id);
    }
    tracing::info!(model = client.model(), stream, "Asking Claude");

    let reply = if stream {
        let hooks = StreamHooks::new()
            .on_session_id(display::print_session)
            .on_text(|text| tracing::debug!(chars = text.len(), "Assistant text"));
        client
            .invoke_streaming(prompt, &options, &hooks)
            .await
            .map(|reply| {
                if reply.cancelled {
                    tracing::warn!("Claude was interrupted, output may be partial");
                }
                reply.text
            })
    } else {
        client.invoke(prompt, &options).await
    };

    match reply {
        Ok(text) => {
            display::print_text(&text);
            println!();
            ExitCode::SUCCESS
        }
        Err(e) => {
            display::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn run(
    config: &RunnerConfig,
    task: String,
    team: bool,
    resume: Option<String>,
    cwd: Option<PathBuf>,
) -> ExitCode {
    let run_id = uuid::Uuid::new_v4().to_string();
    let mode = if team { RunMode::Team } else { RunMode::Single };
    let kill = KillSwitch::new();

    let on_interrupt = kill.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.kill();
        }
    });

    let start_id = run_id.clone();
    let callbacks = RunCallbacks::new()
        .on_start(move |pid, bridge| {
            display::print_run_start(&start_id, pid, team);
            tokio::spawn(forward_stdin(bridge, team));
        })
        .on_session_id(display::print_session)
        .on_progress(display::print_progress)
        .on_question(display::print_question)
        .on_plan_approval(display::print_plan)
        .on_complete(display::print_complete)
        .on_error(display::print_error);

    let mut request = RunRequest::new(task)
        .mode(mode)
        .callbacks(callbacks)
        .kill_switch(kill);
    if let Some(id) = resume {
        request = request.resume(id);
    }
    if let Some(dir) = cwd {
        request = request.working_dir(dir);
    }

    tracing::info!(run_id = %run_id, team, "Starting run");
    match StreamingRunner::new(config).run(request).await {
        Ok(outcome) => {
            if let Some(ref team_id) = outcome.team_id {
                tracing::info!(run_id = %run_id, team = %team_id, "Team used");
            }
            match outcome.status {
                RunStatus::Completed { .. } => ExitCode::SUCCESS,
                RunStatus::Failed { .. } => ExitCode::FAILURE,
            }
        }
        Err(e) => {
            tracing::debug!(run_id = %run_id, error = %e, "Run did not start");
            ExitCode::FAILURE
        }
    }
}

/// Forward terminal input to the session until stdin or the session closes.
async fn forward_stdin(bridge: InputBridge, close_on_eof: bool) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while bridge.is_alive() {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading stdin");
                return;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let sent = if let Some(rest) = line.strip_prefix("/approve ") {
            bridge.send_plan_decision(rest.trim(), true, None).await
        } else if let Some(rest) = line.strip_prefix("/reject ") {
            let (id, feedback) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
            let feedback = Some(feedback.trim()).filter(|f| !f.is_empty());
            bridge.send_plan_decision(id, false, feedback).await
        } else if let Some(rest) = line.strip_prefix("/answer ") {
            match rest.trim().split_once(' ') {
                Some((id, answer)) => bridge.send_tool_result(id, answer.trim()).await,
                None => {
                    display::print_error("usage: /answer <tool_use_id> <text>");
                    continue;
                }
            }
        } else {
            bridge.send_user_message(line).await
        };

        if let Err(e) = sent {
            tracing::debug!(error = %e, "Session no longer accepts input");
            return;
        }
    }
    if close_on_eof {
        bridge.close().await;
    }
}
