//! Basic worker pool usage example
//!
//! Demonstrates pool creation, job submission, draining, joining and
//! statistics.
//!
//! Run with: RUST_LOG=debug cargo run --example basic_usage

use drain_pool::prelude::*;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();

    println!("=== Drain Pool - Basic Usage Example ===\n");

    let pool = ThreadPool::new(4)?;
    println!("1. Started pool with {} threads", pool.size());

    println!("\n2. Submitting simple jobs:");
    for i in 0..10 {
        pool.execute(move || {
            println!(
                "  Job {} executing on thread {:?}",
                i,
                thread::current().name().unwrap_or("unnamed")
            );
            thread::sleep(Duration::from_millis(50));
        });
    }
    println!("   Pending right after submission: {}", pool.jobs_pending());

    pool.wait_all();
    println!("\n3. Drained, pending: {}", pool.jobs_pending());

    println!("\n4. Per-worker statistics:");
    for (i, stat) in pool.worker_stats().iter().enumerate() {
        println!(
            "   Worker {}: {} processed, {} panicked, avg time: {:.2}μs",
            i,
            stat.get_jobs_processed(),
            stat.get_jobs_panicked(),
            stat.get_average_processing_time_us()
        );
    }

    println!("\n5. Submitting more jobs after the drain:");
    for i in 10..20 {
        pool.execute(move || println!("  Job {} executing", i));
    }

    println!("\n6. Joining the pool...");
    pool.join_all()?;

    pool.execute(|| println!("  never printed"));
    println!("\n7. Final statistics: {:?}", pool.stats());

    println!("\n=== Example completed successfully! ===");

    Ok(())
}
