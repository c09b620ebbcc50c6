//! Benchmark: sync and async dispatch against the in-process loopback host.

use std::hint::black_box;

use serde_json::json;

use opbridge::Bridge;
use opbridge::config::RECOMMENDED_SIZE;
use opbridge::loopback::LoopbackHost;

const CALLS_PER_BATCH: usize = 64;

fn main() {
    let host = LoopbackHost::new(RECOMMENDED_SIZE).expect("valid region size");
    host.register_sync("op_echo", |args, _| Ok(args.clone()))
        .expect("register op_echo");
    host.register_async("op_len", |_, bytes| Ok(json!(bytes.map_or(0, <[u8]>::len))))
        .expect("register op_len");
    let bridge = Bridge::new(host);
    bridge
        .register_json_completion("op_len")
        .expect("op_len is registered");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("failed to build runtime");
    let buffer = vec![7u8; 256];

    // Warm up
    for _ in 0..1_000 {
        let _ = bridge.send_sync("op_echo", json!({"n": 1}), None);
    }

    let start = std::time::Instant::now();
    const TARGET_DURATION: std::time::Duration = std::time::Duration::from_secs(2);
    let mut sync_calls: u64 = 0;
    while start.elapsed() < TARGET_DURATION {
        let result = bridge.send_sync("op_echo", black_box(json!({"n": sync_calls})), None);
        let _ = black_box(result);
        sync_calls += 1;
    }
    let sync_elapsed = start.elapsed();

    let start = std::time::Instant::now();
    let mut async_calls: u64 = 0;
    runtime.block_on(async {
        while start.elapsed() < TARGET_DURATION {
            let calls: Vec<_> = (0..CALLS_PER_BATCH)
                .map(|_| bridge.send_async("op_len", json!({}), Some(black_box(buffer.as_slice()))))
                .collect();
            bridge.poll_host().expect("poll_host failed");
            for call in calls {
                let _ = black_box(call.await);
            }
            async_calls += CALLS_PER_BATCH as u64;
        }
    });
    let async_elapsed = start.elapsed();

    eprintln!("dispatch: {} sync calls in {:?}", sync_calls, sync_elapsed);
    eprintln!(
        "  {:.0} sync calls/s",
        sync_calls as f64 / sync_elapsed.as_secs_f64()
    );
    eprintln!("dispatch: {} async calls in {:?}", async_calls, async_elapsed);
    eprintln!(
        "  {:.0} async calls/s (batches of {})",
        async_calls as f64 / async_elapsed.as_secs_f64(),
        CALLS_PER_BATCH
    );
}
