/*!
 * Shared helpers for process tests
 */

use procmux::Command;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

pub fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

/// Command running a fixture script through `sh`
pub fn script(name: &str, args: &[&str]) -> Command {
    Command::new(["sh".to_string(), fixture(name)]).with_args(args.iter().copied())
}

/// Poll `condition` until it holds or `timeout` passes
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
