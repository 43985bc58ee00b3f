//! Basic stagehand example
//!
//! Demonstrates a coalescing task, an exactly-once call, a one-shot timer
//! and a recurring timer on one theater.
//!
//! # Environment Variables
//!
//! - `STAGEHAND_FLUSH_EPRINT=1` - Flush debug output immediately
//! - `STAGEHAND_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)

use stagehand::{conts, task_fn, timer_fn, BoxError, ClockConfig, Recurring, Runtime};
use stagehand::{kdebug, kinfo, Schedule, Stage, SyncCont, TheaterConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// STAGEHAND_LOG_LEVEL=debug STAGEHAND_FLUSH_EPRINT=1 cargo run -p stagehand-basic
fn main() -> Result<(), BoxError> {
    println!("=== Stagehand Basic Example ===\n");

    let config = TheaterConfig::from_env()
        .name("basic")
        .parallelism(4)
        .clock(ClockConfig::from_env().tick_millis(10));

    let runtime = Runtime::new(config)?;

    runtime.block_on(|theater| -> Result<(), BoxError> {
        // A task cued many times while busy runs once more, not once per cue
        let runs = Arc::new(AtomicUsize::new(0));
        let task = {
            let runs = runs.clone();
            theater.task(task_fn(move || {
                let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                kdebug!("[task] run {}", n);
                std::thread::sleep(Duration::from_millis(20));
            }))
        };
        let accepted = (0..10).filter(|_| task.cue()).count();
        println!("Cued task 10 times, {} cue(s) accepted", accepted);

        // A call completes its continuation exactly once, on a worker
        let result = Arc::new(SyncCont::<u64>::new());
        let call = theater.call(conts::map::<u64, u64, _>(result.clone(), |n: u64| n * n));
        call.bind(12)?;
        println!("Second bind rejected: {}", call.bind(13).is_err());
        println!("Call result: {}", result.await_result(Duration::from_secs(5))?);

        // One-shot timer
        let start = Instant::now();
        let fired = Arc::new(SyncCont::<Duration>::new());
        {
            let fired = fired.clone();
            theater.set_timer(
                50,
                timer_fn(move || stagehand::Cont::bind(&*fired, start.elapsed())),
            )?;
        }
        println!(
            "Timer for 50ms fired after {:?}",
            fired.await_result(Duration::from_secs(5))?
        );

        // Recurring timer, stopped from inside its fifth trigger
        let ticks = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(SyncCont::<usize>::new());
        let recurring = {
            let ticks = ticks.clone();
            let done = done.clone();
            Recurring::new(theater.clone(), 25, move |recurring| {
                let n = ticks.fetch_add(1, Ordering::SeqCst) + 1;
                kdebug!("[recurring] tick {}", n);
                if n == 5 {
                    recurring.stop();
                    stagehand::Cont::bind(&*done, n);
                }
            })
        };
        recurring.start()?;
        println!("Recurring stopped after {} ticks", done.await_result(Duration::from_secs(5))?);

        kinfo!("task ran {} time(s)", runs.load(Ordering::SeqCst));
        Ok(())
    })??;

    println!("\n=== Example Complete ===");
    Ok(())
}
