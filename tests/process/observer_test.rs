/*!
 * Exit Observer Tests
 * Exit/callback pairing under arbitrary arrival order
 */

use parking_lot::Mutex;
use procmux::process::{ExitObserver, TrackingToken};
use procmux::signals::testing::ScriptedSource;
use procmux::signals::{ChildState, ChildTransition, Signal, SignalDispatcher};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

const CHILDREN: usize = 6;

fn harness() -> (Arc<ScriptedSource>, Arc<ExitObserver>) {
    let source = Arc::new(ScriptedSource::new());
    let dispatcher = Arc::new(SignalDispatcher::new(source.clone()));
    (source, ExitObserver::new(dispatcher))
}

proptest! {
    /// Steps below CHILDREN are exits, the rest attach callbacks
    #[test]
    fn prop_each_callback_gets_its_own_code_once(
        order in Just((0..CHILDREN * 2).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let (source, observer) = harness();
        let mut tokens: HashMap<u32, TrackingToken> = (0..CHILDREN as u32)
            .map(|i| (100 + i, observer.start_tracking().unwrap()))
            .collect();
        let got = Arc::new(Mutex::new(Vec::new()));

        for step in order {
            if step < CHILDREN {
                source.push_transition(ChildTransition {
                    pid: 100 + step as u32,
                    state: ChildState::Exited(step as i32),
                });
                observer.dispatcher().deliver(Signal::SIGCHLD).unwrap();
            } else {
                let pid = 100 + (step - CHILDREN) as u32;
                let token = tokens.remove(&pid).unwrap();
                let sink = got.clone();
                token.on_exit(pid, move |code| sink.lock().push((pid, code))).unwrap();
            }
        }

        let mut got = got.lock().clone();
        got.sort_unstable();
        let expected: Vec<(u32, i32)> = (0..CHILDREN).map(|i| (100 + i as u32, i as i32)).collect();
        prop_assert_eq!(got, expected);
        prop_assert_eq!(observer.active_count(), 0);
        prop_assert_eq!(observer.pending_count(), 0);
        prop_assert_eq!(observer.callback_count(), 0);
        prop_assert!(!observer.dispatcher().is_registered(Signal::SIGCHLD));
    }
}

#[test]
fn test_listener_reinstalled_for_new_session() {
    let (source, observer) = harness();

    let token = observer.start_tracking().unwrap();
    drop(token);
    assert!(!observer.dispatcher().is_registered(Signal::SIGCHLD));

    let _token = observer.start_tracking().unwrap();
    assert!(observer.dispatcher().is_registered(Signal::SIGCHLD));
    assert_eq!(source.installed(), vec![Signal::SIGCHLD]);
}

#[test]
fn test_stale_exit_does_not_leak_into_next_session() {
    let (source, observer) = harness();

    let first = observer.start_tracking().unwrap();
    source.push_transition(ChildTransition {
        pid: 42,
        state: ChildState::Exited(9),
    });
    observer.dispatcher().deliver(Signal::SIGCHLD).unwrap();
    drop(first);

    // Same pid reused by a later child
    let got = Arc::new(Mutex::new(None));
    let sink = got.clone();
    observer
        .start_tracking()
        .unwrap()
        .on_exit(42, move |code| *sink.lock() = Some(code))
        .unwrap();
    assert_eq!(*got.lock(), None);

    source.push_transition(ChildTransition {
        pid: 42,
        state: ChildState::Exited(0),
    });
    observer.dispatcher().deliver(Signal::SIGCHLD).unwrap();
    assert_eq!(*got.lock(), Some(0));
}
