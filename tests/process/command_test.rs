/*!
 * Command Builder Tests
 * Argument vector assembly and fail-fast validation
 */

use crate::support::{fixture, script};
use pretty_assertions::assert_eq;
use procmux::{Command, CommandLine, ProcessError, RuntimeConfig, Signal};
use std::time::Duration;

#[test]
fn test_argv_passes_through() {
    let command = Command::new(["grep", "-n", "needle", "haystack.txt"]);
    assert_eq!(
        command.build_command(),
        vec!["grep", "-n", "needle", "haystack.txt"]
    );
}

#[test]
fn test_fixture_command() {
    let command = script("exit.sh", &["3"]);
    assert_eq!(command.build_command(), vec!["sh".to_string(), fixture("exit.sh"), "3".to_string()]);
}

#[test]
fn test_timeout_defaults_are_omitted() {
    let command = Command::new(["sleep", "1"])
        .with_timeout(Duration::from_millis(10), Signal::SIGTERM, None)
        .unwrap();
    assert_eq!(command.build_command(), vec!["timeout", "0.01s", "sleep", "1"]);
}

#[test]
fn test_timeout_with_signal_and_kill_after() {
    let command = Command::new(["sleep", "10"])
        .with_timeout(Duration::from_secs(5), Signal::SIGKILL, Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(
        command.build_command(),
        vec!["timeout", "--signal", "9", "--kill-after", "2s", "5s", "sleep", "10"]
    );
}

#[test]
fn test_shell_command_uses_configured_shell() {
    let config = RuntimeConfig {
        shell: "/bin/bash".into(),
        ..RuntimeConfig::default()
    };
    let command = Command::shell("echo $HOME").with_config(config);
    assert_eq!(command.build_command(), vec!["/bin/bash", "-c", "echo $HOME"]);
    assert_eq!(command.line(), &CommandLine::Shell("echo $HOME".into()));
}

#[test]
fn test_zero_kill_after_rejected() {
    let err = Command::new(["true"])
        .with_timeout(Duration::from_secs(1), Signal::SIGTERM, Some(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(err, ProcessError::InvalidConfig(_)));
}

#[test]
fn test_empty_command_rejected_before_spawn() {
    let err = Command::new(Vec::<String>::new()).start().unwrap_err();
    assert!(matches!(err, ProcessError::InvalidConfig(_)));

    let err = Command::shell("   ").start().unwrap_err();
    assert!(matches!(err, ProcessError::InvalidConfig(_)));
}
