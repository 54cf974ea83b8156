//! Drives a pool with many requesters submitting work of random duration and
//! logs how evenly the balancer spreads it.
//!
//! ```text
//! RUST_LOG=info LOADWELL_WORKERS=10 cargo run --example simulate
//! RUST_LOG=loadwell=trace LOADWELL_STRATEGY=round_robin cargo run --example simulate
//! ```

use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use loadwell::{Config, ThreadPool};
use rand::Rng;

const REQUESTERS: usize = 200;
const RUN_FOR: Duration = Duration::from_secs(5);
const REPORT_EVERY: Duration = Duration::from_millis(500);

/// Simulation of some work: sleep for a while and report how long.
fn op() -> u64 {
    let micros = rand::thread_rng().gen_range(0..20_000);
    thread::sleep(Duration::from_micros(micros));
    micros
}

fn requester(pool: &ThreadPool<u64>, stop: &AtomicBool) -> u64 {
    let mut rng = rand::thread_rng();
    let mut served = 0;

    while !stop.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(rng.gen_range(0..200)));

        match pool.submit(op).and_then(|handle| handle.wait()) {
            Ok(_) => served += 1,
            Err(e) => {
                tracing::warn!(error = %e, "request failed");
                break;
            }
        }
    }

    served
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        workers = config.workers,
        strategy = ?config.strategy,
        requesters = REQUESTERS,
        "starting simulation"
    );

    let pool = ThreadPool::new(config)?;
    let stop = AtomicBool::new(false);
    let started = Instant::now();

    let served: u64 = thread::scope(|s| {
        let requesters: Vec<_> = (0..REQUESTERS)
            .map(|_| s.spawn(|| requester(&pool, &stop)))
            .collect();

        while started.elapsed() < RUN_FOR {
            thread::sleep(REPORT_EVERY);
            match pool.stats() {
                Ok(stats) => tracing::info!(
                    loads = ?stats.pending(),
                    mean = format_args!("{:.2}", stats.mean()),
                    variance = format_args!("{:.2}", stats.variance()),
                    "load"
                ),
                Err(e) => tracing::warn!(error = %e, "stats unavailable"),
            }
        }

        stop.store(true, Ordering::Relaxed);
        requesters
            .into_iter()
            .map(|r| r.join().unwrap_or(0))
            .sum()
    });

    let stats = pool.stats()?;
    tracing::info!(
        served,
        dispatched = ?stats.workers.iter().map(|w| w.dispatched).collect::<Vec<_>>(),
        "simulation finished"
    );

    pool.shutdown()?;
    Ok(())
}
