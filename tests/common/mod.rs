#![allow(dead_code)]

use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use opbridge::Bridge;
use opbridge::loopback::LoopbackHost;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("opbridge=debug"))
        .with_test_writer()
        .try_init();
}

/// Loopback host with the ops most tests need:
/// `op_echo` (sync, returns its args), `op_fail` (sync, errors with "boom"),
/// `op_null` (sync, succeeds with null), `op_double` (async, doubles `n`),
/// `op_reject` (async, errors with "rejected").
pub fn standard_host(shared_size: usize) -> LoopbackHost {
    let host = LoopbackHost::new(shared_size).expect("valid region size");
    host.register_sync("op_echo", |args, _| Ok(args.clone()))
        .expect("register op_echo");
    host.register_sync("op_fail", |_, _| Err("boom".to_string()))
        .expect("register op_fail");
    host.register_sync("op_null", |_, _| Ok(Value::Null))
        .expect("register op_null");
    host.register_async("op_double", |args, _| {
        Ok(json!(args["n"].as_i64().unwrap_or(0) * 2))
    })
    .expect("register op_double");
    host.register_async("op_reject", |_, _| Err("rejected".to_string()))
        .expect("register op_reject");
    host
}

/// Poll the host until no call is outstanding. Panics after `timeout`.
pub fn drive_until_idle(bridge: &Bridge, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while bridge.outstanding_calls() > 0 {
        bridge.poll_host().expect("poll_host failed");
        assert!(
            Instant::now() < deadline,
            "{} calls still outstanding",
            bridge.outstanding_calls()
        );
        std::hint::spin_loop();
    }
}
