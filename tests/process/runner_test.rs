/*!
 * Process Runner Tests
 * Real child processes observed through the process-wide dispatcher
 */

use crate::support::{eventually, script};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use procmux::{Command, ExitObserver, ProcessError, ProcessResult, Signal};
use serial_test::serial;
use std::sync::{mpsc, Arc};
use std::time::Duration;

fn failed(err: ProcessError) -> Arc<ProcessResult> {
    match err {
        ProcessError::Failed(result) => result,
        other => panic!("expected process failure, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_successful_exit() {
    let result = script("exit.sh", &["0"]).run().unwrap();
    assert_eq!(result.exit_code(), 0);
    assert!(result.succeeded());
    assert!(result.is_expected());
}

#[test]
#[serial]
fn test_unexpected_exit_code_fails_with_result() {
    let process = script("exit.sh", &["3"]).start().unwrap();

    let first = failed(process.wait().unwrap_err());
    assert_eq!(first.exit_code(), 3);

    let second = failed(process.wait().unwrap_err());
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &process.result().unwrap()));
}

#[test]
#[serial]
fn test_expected_exit_code_accepted() {
    let result = script("exit.sh", &["3"])
        .with_expected_exit_codes([3])
        .run()
        .unwrap();
    assert_eq!(result.exit_code(), 3);
    assert!(!result.succeeded());
}

#[test]
#[serial]
fn test_wait_is_idempotent() {
    let process = script("exit.sh", &["0"]).start().unwrap();
    let first = process.wait().unwrap();
    let second = process.wait().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(process.is_done());
}

#[test]
#[serial]
fn test_timeout_wrapper_reports_timed_out() {
    let command = Command::new(["sleep", "1"])
        .with_timeout(Duration::from_millis(10), Signal::SIGTERM, None)
        .unwrap();
    let executed = command.build_command();
    assert_eq!(executed[0], "timeout");
    assert!(executed.contains(&"0.01s".to_string()));

    let result = failed(command.run().unwrap_err());
    assert!(result.timed_out());
    assert_eq!(result.exit_code(), 124);
    assert_eq!(result.info().executed, executed);
}

#[test]
#[serial]
fn test_stdin_is_recorded() {
    let process = script("echo_stdin.sh", &[]).start().unwrap();
    assert_eq!(process.write_to_stdin("hello", true).unwrap(), 6);
    process.write_to_stdin("world", true).unwrap();
    process.close_stdin();
    assert!(process.write_to_stdin("late", false).is_err());

    let result = process.wait().unwrap();
    assert_eq!(&result.stdin()[..], b"hello\nworld\n");
    assert_eq!(result.stdout_lossy(), "hello\nworld\n");
}

#[test]
#[serial]
fn test_failed_stdin_write_is_not_recorded() {
    let process = script("echo_stdin.sh", &[]).start().unwrap();
    process.write_to_stdin("kept", true).unwrap();
    process.close_stdin();
    assert!(matches!(
        process.write_to_stdin("dropped", true),
        Err(ProcessError::Stream(_))
    ));
    assert_eq!(&process.stdin_buffer()[..], b"kept\n");

    let result = process.wait().unwrap();
    assert_eq!(&result.stdin()[..], b"kept\n");
}

#[test]
#[serial]
fn test_write_to_closed_reader_is_not_recorded() {
    let process = Command::new(["sh", "-c", "exec 0<&-; sleep 5"]).start().unwrap();
    let stdin = format!("/proc/{}/fd/0", process.pid());
    assert!(eventually(Duration::from_secs(5), || {
        !std::path::Path::new(&stdin).exists()
    }));

    let err = match process.write_to_stdin("lost", true) {
        Err(ProcessError::Stream(err)) => err,
        other => panic!("expected a stdin stream error, got {:?}", other),
    };
    assert_eq!(err.raw_os_error(), Some(nix::libc::EPIPE));
    assert!(process.stdin_buffer().is_empty());
}

#[test]
#[serial]
fn test_kill_reports_signal_exit_code() {
    let process = Command::new(["sleep", "5"]).start().unwrap();
    assert!(process.is_running());
    assert!(process.signal(Signal::SIGKILL).unwrap());

    let result = failed(process.wait().unwrap_err());
    assert_eq!(result.exit_code(), 137);
    assert_eq!(result.terminating_signal(), Some(9));
    assert!(!process.is_running());
    assert!(!process.signal(Signal::SIGKILL).unwrap());
}

#[test]
#[serial]
fn test_terminate_uses_termination_signal() {
    let process = Command::new(["sleep", "5"])
        .with_termination_signal(Signal::SIGINT)
        .start()
        .unwrap();
    assert!(process.terminate(None).unwrap());
    assert_eq!(failed(process.wait().unwrap_err()).exit_code(), 130);
}

#[test]
#[serial]
fn test_terminate_escalates_to_kill() {
    let process = Command::shell("trap '' TERM; echo ready; while :; do sleep 0.05; done")
        .start()
        .unwrap();
    assert!(eventually(Duration::from_secs(5), || {
        !process.read_stdout_buffer().unwrap().is_empty()
    }));

    assert!(process.terminate(Some(Duration::from_millis(200))).unwrap());
    let result = failed(process.wait().unwrap_err());
    assert_eq!(result.exit_code(), 137);
}

#[test]
#[serial]
fn test_live_reads_and_result_cover_all_output() {
    let process = Command::shell("echo first; sleep 0.3; echo second")
        .start()
        .unwrap();

    let mut seen = Vec::new();
    assert!(eventually(Duration::from_secs(5), || {
        seen.extend_from_slice(&process.read_stdout_buffer().unwrap());
        !seen.is_empty()
    }));

    let result = process.wait().unwrap();
    seen.extend_from_slice(&result.stdout());
    assert_eq!(String::from_utf8(seen).unwrap(), "first\nsecond\n");
}

#[test]
#[serial]
fn test_read_buffer_is_empty_after_exit() {
    let process = Command::shell("echo gone; echo oops >&2").start().unwrap();
    let result = process.wait().unwrap();
    assert!(process.read_stdout_buffer().unwrap().is_empty());
    assert!(process.read_stderr_buffer().unwrap().is_empty());
    assert_eq!(result.stdout_lossy(), "gone\n");
    assert_eq!(result.stderr_lossy(), "oops\n");
}

#[test]
#[serial]
fn test_large_output_does_not_block_wait() {
    let result = Command::shell("head -c 300000 /dev/zero").run().unwrap();
    assert_eq!(result.stdout().len(), 300_000);
}

#[test]
#[serial]
fn test_active_count_returns_to_baseline() {
    let observer = ExitObserver::global().unwrap();
    let before = observer.active_count();

    let process = Command::new(["sleep", "0.2"]).start().unwrap();
    assert_eq!(observer.active_count(), before + 1);
    process.wait().unwrap();

    assert!(eventually(Duration::from_secs(2), || {
        observer.active_count() == before
    }));
}

#[test]
#[serial]
fn test_spawn_failure_releases_tracking() {
    let observer = ExitObserver::global().unwrap();
    let before = observer.active_count();

    let err = Command::new(["/nonexistent/procmux-test-binary"])
        .start()
        .unwrap_err();
    assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    assert_eq!(observer.active_count(), before);
}

#[test]
#[serial]
fn test_missing_program_through_shell() {
    let result = failed(
        Command::shell("exec /nonexistent/procmux-test-binary")
            .run()
            .unwrap_err(),
    );
    assert!(result.not_found());
}

#[test]
#[serial]
fn test_shell_env_and_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let expected_dir = dir.path().canonicalize().unwrap();

    let result = Command::shell("echo \"$GREETING\"; pwd -P")
        .with_env("GREETING", "hi")
        .with_cwd(dir.path())
        .run()
        .unwrap();

    let out = result.stdout_lossy();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines, vec!["hi", expected_dir.to_str().unwrap()]);
    assert_eq!(
        result.info().env.as_ref().and_then(|env| env.get("GREETING")).map(String::as_str),
        Some("hi")
    );
}

#[test]
#[serial]
fn test_env_clear() {
    let result = Command::new(["/usr/bin/env"])
        .with_env_clear()
        .with_env("ONLY", "1")
        .run()
        .unwrap();
    assert_eq!(result.stdout_lossy(), "ONLY=1\n");
}

#[test]
#[serial]
fn test_hooks_fire_once() {
    let started = Arc::new(Mutex::new(Vec::new()));
    let finished = Arc::new(Mutex::new(Vec::new()));

    let on_start = started.clone();
    let on_finish = finished.clone();
    let result = script("exit.sh", &["0"])
        .on_started(move |info| on_start.lock().push(info.pid))
        .on_finished(move |info, code| on_finish.lock().push((info.pid, code)))
        .run()
        .unwrap();

    let pid = result.info().pid;
    assert_eq!(*started.lock(), vec![pid]);
    assert!(eventually(Duration::from_secs(2), || finished.lock().len() == 1));
    assert_eq!(*finished.lock(), vec![(pid, 0)]);
}

#[test]
#[serial]
fn test_finished_hook_can_run_another_command() {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    let result = script("exit.sh", &["0"])
        .on_finished(move |_, _| {
            let nested = Command::new(["true"]).run();
            let _ = tx.lock().send(nested.map(|result| result.exit_code()));
        })
        .run()
        .unwrap();
    assert_eq!(result.exit_code(), 0);

    let nested = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(nested.unwrap(), 0);

    // Exits are still observed afterwards
    let later = Command::new(["true"]).start().unwrap();
    assert!(later.wait_timeout(Duration::from_secs(5)).unwrap().is_some());
}

#[test]
#[serial]
fn test_finished_hook_runs_off_signal_thread() {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    script("exit.sh", &["0"])
        .on_finished(move |_, _| {
            let name = std::thread::current().name().map(str::to_owned);
            let _ = tx.lock().send(name);
        })
        .run()
        .unwrap();

    let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(name.as_deref(), Some("procmux-hooks"));
}

#[test]
#[serial]
fn test_wait_inside_signal_listener_fails_fast() {
    let dispatcher = Arc::clone(ExitObserver::global().unwrap().dispatcher());
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    let handle = dispatcher
        .register(Signal::SIGUSR2, move |_| {
            let refused = match Command::new(["sleep", "5"]).start() {
                Ok(process) => matches!(
                    process.wait(),
                    Err(ProcessError::WaitOnSignalThread(pid)) if pid == process.pid()
                ),
                Err(_) => false,
            };
            let _ = tx.lock().send(refused);
        })
        .unwrap();
    nix::sys::signal::raise(nix::sys::signal::Signal::SIGUSR2).unwrap();

    let refused = rx.recv_timeout(Duration::from_secs(5));
    dispatcher.unregister(handle);
    assert_eq!(refused, Ok(true));

    let later = Command::new(["true"]).start().unwrap();
    assert!(later.wait_timeout(Duration::from_secs(5)).unwrap().is_some());
}

#[test]
#[serial]
fn test_wait_timeout() {
    let process = Command::new(["sleep", "5"]).start().unwrap();
    assert!(process
        .wait_timeout(Duration::from_millis(50))
        .unwrap()
        .is_none());

    process.signal(Signal::SIGKILL).unwrap();
    let err = process.wait_timeout(Duration::from_secs(5)).unwrap_err();
    assert_eq!(failed(err).exit_code(), 137);
}

#[test]
#[serial]
fn test_wait_async() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let process = script("exit.sh", &["0"]).start().unwrap();
    let result = runtime.block_on(process.wait_async()).unwrap();
    assert_eq!(result.exit_code(), 0);
}

#[test]
#[serial]
fn test_drop_kills_running_process() {
    let process = Command::new(["sleep", "5"]).start().unwrap();
    let pid = nix::unistd::Pid::from_raw(process.pid() as i32);
    drop(process);

    assert!(eventually(Duration::from_secs(5), || {
        nix::sys::signal::kill(pid, None).is_err()
    }));
}
