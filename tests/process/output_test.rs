/*!
 * Live Output Tests
 * Iterating stdout/stderr while the child runs
 */

use crate::support::script;
use pretty_assertions::assert_eq;
use procmux::{Command, StreamId};
use serial_test::serial;

#[test]
#[serial]
fn test_iteration_and_result_cover_both_streams() {
    let process = script("chatty.sh", &["0.2"]).start().unwrap();
    process.close_stdin();

    let mut out = Vec::new();
    let mut err = Vec::new();
    for chunk in &process {
        let (stream, bytes) = chunk.unwrap();
        match stream {
            StreamId::Stdout => out.extend_from_slice(&bytes),
            StreamId::Stderr => err.extend_from_slice(&bytes),
            StreamId::Stdin => panic!("stdin is never yielded"),
        }
    }

    let result = process.wait().unwrap();
    out.extend_from_slice(&result.stdout());
    err.extend_from_slice(&result.stderr());
    assert_eq!(String::from_utf8(out).unwrap(), "out 1\nout 2\n");
    assert_eq!(String::from_utf8(err).unwrap(), "err 1\nerr 2\n");
}

#[test]
#[serial]
fn test_first_chunk_arrives_before_exit() {
    let process = script("chatty.sh", &["1"]).start().unwrap();

    let (stream, bytes) = process.iter().next().unwrap().unwrap();
    assert!(matches!(stream, StreamId::Stdout | StreamId::Stderr));
    assert!(!bytes.is_empty());
    assert!(process.is_running());

    process.wait().unwrap();
}

#[test]
#[serial]
fn test_iteration_after_exit_is_empty() {
    let process = Command::shell("echo done").start().unwrap();
    let result = process.wait().unwrap();

    assert_eq!(process.iter().count(), 0);
    assert_eq!(result.stdout_lossy(), "done\n");
}
