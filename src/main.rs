/*!
 * procmux - Command Line Entry Point
 *
 * Runs one command under supervision, streams its output live and exits
 * with the child's exit code.
 */

use anyhow::{bail, Context, Result};
use clap::Parser;
use procmux::{init_tracing, Command, ProcessError, RuntimeConfig, Signal, StreamId};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "procmux")]
#[command(about = "Run a command under supervision and stream its output")]
#[command(version)]
struct Cli {
    /// Kill the command after this many seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<f64>,

    /// Signal number the timeout wrapper sends
    #[arg(long, value_name = "SIGNAL", requires = "timeout")]
    timeout_signal: Option<i32>,

    /// Seconds to wait before sending SIGKILL after the timeout signal
    #[arg(long, value_name = "SECONDS", requires = "timeout")]
    kill_after: Option<f64>,

    /// Working directory for the command
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Extra environment variable, KEY=VALUE
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    envs: Vec<(String, String)>,

    /// Exit code that also counts as success
    #[arg(long = "expect", value_name = "CODE")]
    expected: Vec<i32>,

    /// Run the command through the shell
    #[arg(long)]
    shell: bool,

    /// Command and its arguments
    #[arg(last = true, required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn parse_env(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    if !value.is_finite() || value <= 0.0 {
        bail!("--{} must be a positive number of seconds", flag);
    }
    Ok(Duration::from_secs_f64(value))
}

fn build(cli: &Cli) -> Result<Command> {
    let mut command = if cli.shell {
        Command::shell(cli.command.join(" "))
    } else {
        Command::new(cli.command.iter().cloned())
    };

    command = command
        .with_config(RuntimeConfig::load()?)
        .with_envs(cli.envs.iter().cloned())
        .with_expected_exit_codes(cli.expected.iter().copied());
    if let Some(dir) = &cli.cwd {
        command = command.with_cwd(dir);
    }
    if let Some(limit) = cli.timeout {
        let signal = match cli.timeout_signal {
            Some(n) => Signal::from_number(n)?,
            None => Signal::SIGTERM,
        };
        let kill_after = cli
            .kill_after
            .map(|s| seconds(s, "kill-after"))
            .transpose()?;
        command = command.with_timeout(seconds(limit, "timeout")?, signal, kill_after)?;
    }
    Ok(command)
}

fn run(cli: Cli) -> Result<i32> {
    let command = build(&cli)?;
    debug!(argv = ?command.build_command(), "Starting command");

    let process = command
        .start()
        .with_context(|| format!("failed to start {}", cli.command.join(" ")))?;
    process.close_stdin();

    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    for chunk in &process {
        let (stream, bytes) = chunk?;
        match stream {
            StreamId::Stderr => {
                let mut err = stderr.lock();
                err.write_all(&bytes)?;
                err.flush()?;
            }
            _ => {
                let mut out = stdout.lock();
                out.write_all(&bytes)?;
                out.flush()?;
            }
        }
    }

    let result = match process.wait() {
        Ok(result) => result,
        Err(ProcessError::Failed(result)) => result,
        Err(e) => return Err(e.into()),
    };

    // Bytes drained at exit, after iteration stopped
    stdout.lock().write_all(&result.stdout())?;
    stderr.lock().write_all(&result.stderr())?;

    info!(pid = result.info().pid, exit_code = result.exit_code(), "Command finished");
    Ok(result.exit_code())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let code = run(cli)?;
    std::process::exit(code);
}
