//! Stress test - many timers and tasks
//!
//! Schedules a large number of timers with random delays, cancels a share
//! of them, and cues a set of tasks from several threads. Reports how late
//! timers fired and whether a cancelled timer fired after its cancel.

use stagehand::{task_fn, timer_fn, BoxError, ClockConfig, Runtime, Schedule, Stage, TheaterConfig};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> Result<(), BoxError> {
    println!("=== Stagehand Stress Test ===\n");

    let num_timers: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000);

    let config = TheaterConfig::from_env()
        .name("stress")
        .clock(ClockConfig::from_env().tick_millis(10).tick_count(1024));
    let tick = Duration::from_millis(config.clock.tick_millis);

    let runtime = Runtime::new(config)?;

    runtime.block_on(|theater| -> Result<(), BoxError> {
        let fired = Arc::new(AtomicUsize::new(0));
        let misfired = Arc::new(AtomicUsize::new(0));
        let max_late_us = Arc::new(AtomicU64::new(0));
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut expected = 0usize;
        let mut cancel_lost = 0usize;

        println!("Scheduling {} timers...", num_timers);
        let start = Instant::now();
        for i in 0..num_timers {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let delay = (seed % 2_000) as i64;
            let cancel = i % 4 == 0;
            let deadline = Instant::now() + Duration::from_millis(delay as u64);

            let timer = {
                let fired = fired.clone();
                let misfired = misfired.clone();
                let max_late_us = max_late_us.clone();
                timer_fn(move || {
                    if cancel {
                        misfired.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    let late = Instant::now().saturating_duration_since(deadline);
                    max_late_us.fetch_max(late.as_micros() as u64, Ordering::Relaxed);
                    fired.fetch_add(1, Ordering::Relaxed);
                })
            };
            let handle = theater.set_timer(delay, timer)?;
            if !cancel {
                expected += 1;
            } else if !handle.cancel() {
                // Fired before the cancel landed
                cancel_lost += 1;
            }

            if (i + 1) % 10_000 == 0 {
                print!("\rScheduled: {}/{}", i + 1, num_timers);
            }
        }
        let schedule_time = start.elapsed();
        println!("\n\nSchedule time: {:?}", schedule_time);
        println!(
            "Schedule rate: {:.0} timers/sec",
            num_timers as f64 / schedule_time.as_secs_f64()
        );

        // Tasks cued from several threads
        let task_runs = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let task_runs = task_runs.clone();
                theater.task(task_fn(move || {
                    task_runs.fetch_add(1, Ordering::Relaxed);
                }))
            })
            .collect();
        let tasks = Arc::new(tasks);
        let cuers: Vec<_> = (0..4)
            .map(|_| {
                let tasks = tasks.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        for task in tasks.iter() {
                            task.cue();
                        }
                    }
                })
            })
            .collect();
        for cuer in cuers {
            let _ = cuer.join();
        }

        println!("\nWaiting for timers...");
        let wait_start = Instant::now();
        loop {
            let done = fired.load(Ordering::Relaxed);
            if done >= expected {
                break;
            }
            if wait_start.elapsed().as_secs() > 30 {
                println!("Timeout! Only {}/{} fired", done, expected);
                break;
            }
            print!("\rFired: {}/{}", done, expected);
            std::thread::sleep(Duration::from_millis(100));
        }

        println!("\n\n=== Results ===");
        println!("Timers scheduled: {}", num_timers);
        println!("Timers fired:     {}", fired.load(Ordering::Relaxed));
        println!(
            "Cancelled fired:  {} ({} fired before cancel)",
            misfired.load(Ordering::Relaxed),
            cancel_lost
        );
        println!(
            "Max lateness:     {:?} (tick {:?})",
            Duration::from_micros(max_late_us.load(Ordering::Relaxed)),
            tick
        );
        println!("Task runs:        {}", task_runs.load(Ordering::Relaxed));
        println!("Total time:       {:?}", start.elapsed());
        Ok(())
    })??;

    println!("\n=== Stress Test Complete ===");
    Ok(())
}
