//! Benchmark: async calls through the worker thread and back via the shared queue.

use std::hint::black_box;

use serde_json::{Value, json};

use opbridge::config::RECOMMENDED_SIZE;
use opbridge::worker_host::WorkerHost;
use opbridge::{Bridge, metrics};

const CALLS_PER_BATCH: usize = 256;
const PAYLOAD_LEN: usize = 64;

fn checksum(args: &Value, bytes: Option<&[u8]>) -> Result<Value, String> {
    let seed = args["seed"].as_u64().unwrap_or(0);
    Ok(json!(seed + bytes.unwrap_or(&[]).iter().map(|&b| b as u64).sum::<u64>()))
}

fn run_batch(bridge: &Bridge, runtime: &tokio::runtime::Runtime, payload: &[u8]) {
    runtime.block_on(async {
        let calls: Vec<_> = (0..CALLS_PER_BATCH)
            .map(|i| bridge.send_async("op_checksum", json!({ "seed": i }), Some(payload)))
            .collect();
        while bridge.outstanding_calls() > 0 {
            bridge.poll_host().expect("poll_host failed");
            std::hint::spin_loop();
        }
        for call in calls {
            let _ = black_box(call.await);
        }
    });
}

fn main() {
    let host = WorkerHost::builder()
        .async_op("op_checksum", checksum)
        .expect("register op_checksum")
        .spawn(RECOMMENDED_SIZE)
        .expect("failed to spawn worker");
    let bridge = Bridge::new(host);
    bridge
        .register_json_completion("op_checksum")
        .expect("op_checksum is registered");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("failed to build runtime");
    let payload = vec![3u8; PAYLOAD_LEN];

    // Warm up
    for _ in 0..100 {
        run_batch(&bridge, &runtime, &payload);
    }

    let start = std::time::Instant::now();
    const TARGET_DURATION: std::time::Duration = std::time::Duration::from_secs(2);
    let mut iterations: u64 = 0;
    while start.elapsed() < TARGET_DURATION {
        run_batch(&bridge, &runtime, black_box(&payload));
        iterations += 1;
    }

    let elapsed = start.elapsed();
    let total_calls = iterations * CALLS_PER_BATCH as u64;
    eprintln!(
        "worker_round_trip: {} calls in {:?} (sustained)",
        total_calls, elapsed
    );
    eprintln!(
        "  {:.0} calls/s  {:.2} us/call (over {:.1}s)",
        total_calls as f64 / elapsed.as_secs_f64(),
        elapsed.as_secs_f64() * 1_000_000.0 / total_calls as f64,
        elapsed.as_secs_f64()
    );
    let snap = metrics::snapshot();
    eprintln!(
        "  direct deliveries={} drains={} max_outstanding={}",
        snap.direct_deliveries, snap.drains, snap.max_outstanding
    );
}
