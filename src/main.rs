use std::time::{Duration, Instant};

use clap::Parser;
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use opbridge::config::{DEFAULT_LOG_FILTER, RECOMMENDED_SIZE};
use opbridge::worker_host::WorkerHost;
use opbridge::{Bridge, metrics};

#[derive(Parser)]
#[command(about = "Drive a bridge against a threaded op host and verify every result")]
struct Args {
    /// Asynchronous calls to issue
    #[arg(short, long, default_value_t = 1000)]
    calls: usize,

    /// Synchronous calls to issue
    #[arg(short, long, default_value_t = 10)]
    sync_calls: usize,

    /// Zero-copy payload bytes per async call
    #[arg(short, long, default_value_t = 64)]
    payload_len: usize,

    /// Shared region size in bytes, header included
    #[arg(long, default_value_t = RECOMMENDED_SIZE)]
    shared_size: usize,
}

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn checksum(args: &Value, bytes: Option<&[u8]>) -> Result<Value, String> {
    let seed = args["seed"].as_u64().unwrap_or(0);
    let bytes = bytes.ok_or_else(|| "op_checksum needs a zero-copy buffer".to_string())?;
    Ok(json!(seed + bytes.iter().map(|&b| b as u64).sum::<u64>()))
}

fn payload(call: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| (call + i) as u8).collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();
    let args = Args::parse();

    let host = WorkerHost::builder()
        .sync("op_echo", |args, _| Ok(args.clone()))?
        .async_op("op_checksum", checksum)?
        .spawn(args.shared_size)?;
    let bridge = Bridge::new(host);
    bridge.register_json_completion("op_checksum")?;

    info!(
        calls = args.calls,
        sync_calls = args.sync_calls,
        payload_len = args.payload_len,
        shared_size = args.shared_size,
        "opbridge: starting"
    );

    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    let mismatches = runtime.block_on(async {
        let mut mismatches = 0usize;

        for i in 0..args.sync_calls {
            let sent = json!({ "n": i });
            let echoed = bridge.send_sync("op_echo", sent.clone(), None)?;
            if echoed != sent {
                warn!(%sent, %echoed, "echo mismatch");
                mismatches += 1;
            }
        }

        let started = Instant::now();
        let mut pending = Vec::with_capacity(args.calls);
        for i in 0..args.calls {
            let bytes = payload(i, args.payload_len);
            let expected = i as u64 + bytes.iter().map(|&b| b as u64).sum::<u64>();
            let call = bridge.send_async("op_checksum", json!({ "seed": i }), Some(&bytes));
            pending.push((call, expected));
        }

        while bridge.outstanding_calls() > 0 {
            bridge.poll_host()?;
            if started.elapsed() > DRAIN_TIMEOUT {
                // Unresolved calls would never wake; report them instead of awaiting.
                let outstanding = bridge.outstanding_calls();
                warn!(outstanding, "gave up waiting for completions");
                return Ok(mismatches + outstanding);
            }
            std::hint::spin_loop();
        }

        for (call, expected) in pending {
            match call.await {
                Ok(value) if value.as_u64() == Some(expected) => {}
                Ok(value) => {
                    warn!(%value, expected, "checksum mismatch");
                    mismatches += 1;
                }
                Err(e) => {
                    warn!(%e, "async call failed");
                    mismatches += 1;
                }
            }
        }

        let elapsed = started.elapsed();
        info!(
            calls = args.calls,
            elapsed_ms = elapsed.as_millis() as u64,
            calls_per_sec = (args.calls as f64 / elapsed.as_secs_f64()) as u64,
            "async calls complete"
        );
        Ok::<_, opbridge::BridgeError>(mismatches)
    })?;

    metrics::log_snapshot();
    if mismatches > 0 {
        return Err(format!("{mismatches} calls returned unexpected results").into());
    }
    info!("opbridge: all results verified");
    Ok(())
}
