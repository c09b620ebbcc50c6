//! Benchmark: shared queue push/shift cycles at full record capacity.

use std::hint::black_box;

use opbridge::config::RECOMMENDED_SIZE;
use opbridge::constants::MAX_RECORDS;
use opbridge::shared_queue::SharedQueue;

fn main() {
    const PAYLOAD_LEN: usize = 60;

    let mut queue = SharedQueue::new(RECOMMENDED_SIZE * 2).expect("valid region size");
    let payload = vec![0xABu8; PAYLOAD_LEN];

    // Warm up
    for _ in 0..10_000 {
        for op_id in 0..MAX_RECORDS as u32 {
            let _ = queue.push(op_id, &payload);
        }
        while let Ok(Some(record)) = queue.shift() {
            black_box(record);
        }
    }

    let start = std::time::Instant::now();
    const TARGET_DURATION: std::time::Duration = std::time::Duration::from_secs(2);
    let mut iterations: u64 = 0;
    let mut rejected: u64 = 0;

    while start.elapsed() < TARGET_DURATION {
        for op_id in 0..MAX_RECORDS as u32 {
            if queue.push(op_id, black_box(&payload)).is_err() {
                rejected += 1;
            }
        }
        while let Ok(Some(record)) = queue.shift() {
            black_box(record.payload);
        }
        iterations += 1;
    }

    let elapsed = start.elapsed();
    let total_records = iterations * MAX_RECORDS as u64;
    eprintln!(
        "shared_queue: {} records in {:?} (sustained, {} rejected)",
        total_records, elapsed, rejected
    );
    eprintln!(
        "  {:.0} records/s  {:.0} MB/s (over {:.1}s)",
        total_records as f64 / elapsed.as_secs_f64(),
        (total_records as f64 * PAYLOAD_LEN as f64 / 1_000_000.0) / elapsed.as_secs_f64(),
        elapsed.as_secs_f64()
    );
}
