//! The scenarios behind each subcommand.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use vmthread_runtime::{
    enter_interruptable_wait, leave_interruptable_wait, sleep, ManagedThread, Registry,
    ThreadBuilder, Throwable, ThrowableKind, UncaughtExceptionHandler,
};

pub fn join(sleep_ms: u64) -> Result<()> {
    let start = Instant::now();
    let worker = ThreadBuilder::new()
        .name("sleeper")
        .spawn(move || {
            sleep(sleep_ms, 0)?;
            Ok(())
        })
        .context("failed to start worker")?;

    worker.join(0, 0)?;
    println!(
        "joined {} after {:?} (alive: {})",
        worker.name(),
        start.elapsed(),
        worker.is_alive()
    );
    Ok(())
}

pub fn interrupt_stress(iterations: usize) -> Result<()> {
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    let target = ThreadBuilder::new()
        .name("stress-target")
        .spawn(move || {
            while counter.load(Ordering::SeqCst) < iterations {
                if enter_interruptable_wait().is_err() || leave_interruptable_wait().is_err() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
            Ok(())
        })
        .context("failed to start stress target")?;

    let start = Instant::now();
    for sent in 1..=iterations {
        target.interrupt();
        while delivered.load(Ordering::SeqCst) < sent {
            std::thread::yield_now();
        }
    }
    target.join(0, 0)?;

    let delivered = delivered.load(Ordering::SeqCst);
    if delivered != iterations {
        bail!("sent {} interrupts but {} were delivered", iterations, delivered);
    }
    println!("delivered {} interrupts in {:?}", delivered, start.elapsed());
    Ok(())
}

pub fn stop() -> Result<()> {
    let seen: Arc<Mutex<Option<ThrowableKind>>> = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let handler: Arc<dyn UncaughtExceptionHandler> =
        Arc::new(move |thread: &ManagedThread, error: &Throwable| {
            tracing::debug!(thread_id = thread.id(), %error, "worker terminated");
            if let Ok(mut slot) = sink.lock() {
                *slot = Some(error.kind().clone());
            }
        });

    let (ready_tx, ready_rx) = mpsc::channel();
    let worker = ThreadBuilder::new()
        .name("victim")
        .uncaught_exception_handler(handler)
        .spawn(move || {
            ready_tx.send(()).ok();
            sleep(60_000, 0)?;
            Ok(())
        })
        .context("failed to start worker")?;

    ready_rx.recv().context("worker never started")?;
    let start = Instant::now();
    worker.stop(Throwable::thread_death())?;
    worker.join(0, 0)?;

    let outcome = seen.lock().ok().and_then(|slot| slot.clone());
    match outcome {
        Some(ThrowableKind::ThreadDeath) => {
            println!("worker stopped after {:?}", start.elapsed());
            Ok(())
        }
        other => bail!("worker ended with {:?}", other),
    }
}

pub fn shutdown(workers: usize) -> Result<()> {
    let registry = Registry::global();
    for i in 0..workers {
        ThreadBuilder::new()
            .name(format!("worker-{}", i))
            .daemon(false)
            .spawn(move || {
                sleep(10 * (i as u64 + 1), 0)?;
                tracing::info!(worker = i, "worker finished");
                Ok(())
            })
            .with_context(|| format!("failed to start worker {}", i))?;
    }

    let start = Instant::now();
    registry.wait_until_last_thread();
    println!(
        "all {} workers finished after {:?}; non-daemon count {}",
        workers,
        start.elapsed(),
        registry.non_daemon_count()
    );
    Ok(())
}
