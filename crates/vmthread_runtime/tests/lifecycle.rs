//! Integration tests for start, join, stop, and adoption.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use vmthread_runtime::{
    checkpoint, current_thread, detach_current, sleep, yield_now, ManagedThread, NativePriority,
    NativeThread, Registry, RuntimeConfig, ThreadBuilder, ThreadError, Throwable, ThrowableKind,
    UncaughtExceptionHandler,
};

type Seen = Arc<Mutex<Vec<ThrowableKind>>>;

fn recording_handler() -> (Seen, Arc<dyn UncaughtExceptionHandler>) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler: Arc<dyn UncaughtExceptionHandler> =
        Arc::new(move |_: &ManagedThread, error: &Throwable| {
            sink.lock().unwrap().push(error.kind().clone());
        });
    (seen, handler)
}

fn isolated() -> Arc<Registry> {
    Registry::new(RuntimeConfig::default())
}

#[test]
fn join_zero_waits_for_sleeping_thread() {
    let registry = isolated();
    let start = Instant::now();
    let worker = ThreadBuilder::new()
        .registry(registry.clone())
        .spawn(|| {
            sleep(50, 0)?;
            Ok(())
        })
        .unwrap();

    worker.join(0, 0).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(!worker.is_alive());
    assert_eq!(registry.non_daemon_count(), 0);
}

#[test]
fn timed_join_returns_while_target_runs() {
    let registry = isolated();
    let (tx, rx) = mpsc::channel::<()>();
    let worker = ThreadBuilder::new()
        .registry(registry)
        .spawn(move || {
            rx.recv().ok();
            Ok(())
        })
        .unwrap();

    worker.join(20, 0).unwrap();
    assert!(worker.is_alive());

    tx.send(()).unwrap();
    worker.join(0, 0).unwrap();
    assert!(!worker.is_alive());
}

#[test]
fn self_join_with_timeout_does_not_deadlock() {
    let me = current_thread();
    let start = Instant::now();
    me.join(10, 0).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(10));
    assert!(me.is_alive());
    assert!(me.join_waiters().is_empty());
}

#[test]
fn join_unstarted_thread_returns_immediately() {
    let thread = ThreadBuilder::new()
        .registry(isolated())
        .build(|| Ok(()))
        .unwrap();
    thread.join(0, 0).unwrap();
}

#[test]
fn join_rejects_bad_nanos() {
    let thread = ThreadBuilder::new()
        .registry(isolated())
        .build(|| Ok(()))
        .unwrap();
    assert!(matches!(
        thread.join(0, 1_000_000),
        Err(ThreadError::IllegalArgument(_))
    ));
}

#[test]
fn stop_before_start_raises_thread_death_instead_of_body() {
    let (seen, handler) = recording_handler();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let thread = ThreadBuilder::new()
        .registry(isolated())
        .uncaught_exception_handler(handler)
        .build(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    thread.stop(Throwable::thread_death()).unwrap();
    thread.start().unwrap();
    thread.join(0, 0).unwrap();

    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(*seen.lock().unwrap(), vec![ThrowableKind::ThreadDeath]);
}

#[test]
fn stop_on_self_is_synchronous() {
    let me = current_thread();
    match me.stop(Throwable::thread_death()) {
        Err(ThreadError::Stopped(t)) => assert_eq!(*t.kind(), ThrowableKind::ThreadDeath),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn stop_wakes_sleeping_thread() {
    let (seen, handler) = recording_handler();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let (tx, rx) = mpsc::channel();
    let worker = ThreadBuilder::new()
        .registry(isolated())
        .uncaught_exception_handler(handler)
        .spawn(move || {
            tx.send(()).ok();
            sleep(10_000, 0)?;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    rx.recv().unwrap();
    let start = Instant::now();
    worker.stop(Throwable::thread_death()).unwrap();
    worker.join(0, 0).unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!finished.load(Ordering::SeqCst));
    assert_eq!(*seen.lock().unwrap(), vec![ThrowableKind::ThreadDeath]);
}

#[test]
fn non_terminal_stop_of_running_thread_is_dropped() {
    let (seen, handler) = recording_handler();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let (tx, rx) = mpsc::channel();
    let worker = ThreadBuilder::new()
        .registry(isolated())
        .uncaught_exception_handler(handler)
        .spawn(move || {
            tx.send(()).ok();
            sleep(30, 0)?;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    rx.recv().unwrap();
    worker
        .stop(Throwable::exception("IllegalStateException", "ignored"))
        .unwrap();
    worker.join(0, 0).unwrap();

    assert!(finished.load(Ordering::SeqCst));
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn stop_reaches_suspended_thread() {
    let (seen, handler) = recording_handler();
    let (tx, rx) = mpsc::channel();
    let worker = ThreadBuilder::new()
        .registry(isolated())
        .uncaught_exception_handler(handler)
        .spawn(move || {
            tx.send(()).ok();
            loop {
                checkpoint()?;
                yield_now();
            }
        })
        .unwrap();

    rx.recv().unwrap();
    worker.suspend();
    let native = worker.native_thread().unwrap();
    while !native.is_suspended() {
        yield_now();
    }

    worker.stop(Throwable::thread_death()).unwrap();
    worker.join(0, 0).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![ThrowableKind::ThreadDeath]);
}

#[test]
fn suspend_and_resume_of_dead_thread_are_ignored() {
    let worker = ThreadBuilder::new()
        .registry(isolated())
        .spawn(|| Ok(()))
        .unwrap();
    worker.join(0, 0).unwrap();
    worker.suspend();
    worker.resume();
}

#[test]
fn panicking_body_reaches_handler() {
    let (seen, handler) = recording_handler();
    let worker = ThreadBuilder::new()
        .registry(isolated())
        .uncaught_exception_handler(handler)
        .spawn(|| panic!("boom"))
        .unwrap();
    worker.join(0, 0).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![ThrowableKind::Panic]);
}

#[test]
fn panicking_handler_is_swallowed() {
    let registry = isolated();
    let handler: Arc<dyn UncaughtExceptionHandler> =
        Arc::new(|_: &ManagedThread, _: &Throwable| panic!("handler failed"));
    let worker = ThreadBuilder::new()
        .registry(registry.clone())
        .uncaught_exception_handler(handler)
        .spawn(|| Err(Throwable::exception("RuntimeException", "body failed")))
        .unwrap();
    worker.join(0, 0).unwrap();
    assert_eq!(registry.non_daemon_count(), 0);
}

#[test]
fn non_daemon_threads_are_counted_until_they_die() {
    let registry = isolated();
    let (tx, rx) = mpsc::channel::<()>();
    let (dtx, drx) = mpsc::channel::<()>();

    let worker = ThreadBuilder::new()
        .registry(registry.clone())
        .daemon(false)
        .spawn(move || {
            rx.recv().ok();
            Ok(())
        })
        .unwrap();
    let daemon = ThreadBuilder::new()
        .registry(registry.clone())
        .daemon(true)
        .spawn(move || {
            drx.recv().ok();
            Ok(())
        })
        .unwrap();

    assert_eq!(registry.non_daemon_count(), 1);
    assert_eq!(registry.root_group().active_count(), 2);

    tx.send(()).unwrap();
    worker.join(0, 0).unwrap();
    assert_eq!(registry.non_daemon_count(), 0);

    dtx.send(()).unwrap();
    daemon.join(0, 0).unwrap();
    assert_eq!(registry.non_daemon_count(), 0);
    assert_eq!(registry.root_group().active_count(), 0);
}

#[test]
fn join_returns_when_adopted_thread_detaches() {
    let (thread_tx, thread_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let foreign = std::thread::spawn(move || {
        let me = current_thread();
        thread_tx.send(me.clone()).unwrap();
        while me.join_waiters().is_empty() {
            std::thread::yield_now();
        }
        detach_current();
        // Still running when the joiner wakes up.
        done_rx.recv().ok();
    });

    let target = thread_rx.recv().unwrap();
    target.join(0, 0).unwrap();

    assert!(!target.is_alive());
    assert!(!current_thread().is_interrupted());
    done_tx.send(()).unwrap();
    foreign.join().unwrap();
}

#[test]
fn join_racing_detach_leaves_no_interrupt_behind() {
    for round in 0..200 {
        let (thread_tx, thread_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let foreign = std::thread::spawn(move || {
            let me = current_thread();
            thread_tx.send(me.clone()).unwrap();
            for _ in 0..round % 7 {
                std::thread::yield_now();
            }
            detach_current();
            done_rx.recv().ok();
        });

        let target = thread_rx.recv().unwrap();
        target.join(0, 0).unwrap();
        assert!(!current_thread().is_interrupted(), "round {round}");
        // A leftover interrupt would fail the next interruptible call.
        sleep(0, 1).unwrap();

        done_tx.send(()).unwrap();
        foreign.join().unwrap();
    }
}

#[test]
fn adopted_thread_takes_native_attributes() {
    let (tx, rx) = mpsc::channel();
    let native = NativeThread::new(
        Some("adoptee".to_string()),
        NativePriority::AboveNormal,
        true,
    );
    native
        .start(None, move || {
            let me = current_thread();
            tx.send((me.name(), me.priority(), me.is_daemon())).ok();
        })
        .unwrap();

    let (name, priority, daemon) = rx.recv().unwrap();
    assert_eq!(name, "adoptee");
    assert_eq!(priority, 7);
    assert!(daemon);
}

#[test]
fn set_name_and_priority_reach_native_thread() {
    let (tx, rx) = mpsc::channel::<()>();
    let worker = ThreadBuilder::new()
        .registry(isolated())
        .name("before")
        .spawn(move || {
            rx.recv().ok();
            Ok(())
        })
        .unwrap();

    worker.set_name("after");
    worker.set_priority(2).unwrap();
    let native = worker.native_thread().unwrap();
    assert_eq!(native.name().as_deref(), Some("after"));
    assert_eq!(native.priority(), NativePriority::BelowNormal);

    tx.send(()).unwrap();
    worker.join(0, 0).unwrap();
}
