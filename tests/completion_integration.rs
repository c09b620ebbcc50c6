//! Completion routing: drain mode, direct-mode overflow, and contract violations.

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde_json::json;

use opbridge::config::RECOMMENDED_SIZE;
use opbridge::constants::{HEAD_INIT, MAX_RECORDS, OpId};
use opbridge::protocol::{self, Envelope, Utf8Codec};
use opbridge::{Bridge, BridgeContext, BridgeError, ProtocolViolation};

#[tokio::test]
async fn drain_delivers_mixed_ops_in_completion_order() {
    common::init_tracing();
    let host = common::standard_host(RECOMMENDED_SIZE);
    let bridge = Bridge::new(host.clone());

    let order: Rc<RefCell<Vec<OpId>>> = Rc::default();
    for name in ["op_double", "op_reject"] {
        let op_id = bridge.op_id(name).expect("known op");
        let order = Rc::clone(&order);
        bridge.set_async_handler(
            op_id,
            Rc::new(move |context: &BridgeContext, payload: &[u8]| {
                order.borrow_mut().push(op_id);
                context.complete_from_host(payload)
            }),
        );
    }
    let double = bridge.op_id("op_double").expect("known op");
    let reject = bridge.op_id("op_reject").expect("known op");

    let a = bridge.send_async("op_double", json!({"n": 1}), None);
    let b = bridge.send_async("op_reject", json!({}), None);
    let c = bridge.send_async("op_double", json!({"n": 3}), None);
    assert_eq!(bridge.poll_host().expect("flush"), 3);

    assert_eq!(*order.borrow(), vec![double, reject, double]);
    assert_eq!(a.await.expect("a"), json!(2));
    assert_eq!(b.await.unwrap_err().to_string(), "rejected");
    assert_eq!(c.await.expect("c"), json!(6));
    assert!(bridge.shared_region().borrow().is_empty());
}

#[tokio::test]
async fn small_region_overflows_into_direct_delivery() {
    common::init_tracing();
    // Room for two or three envelopes at a time.
    let host = common::standard_host(HEAD_INIT + 64);
    let bridge = Bridge::new(host.clone());
    bridge.register_json_completion("op_double").expect("known op");

    let calls: Vec<_> = (0..20)
        .map(|n| bridge.send_async("op_double", json!({ "n": n }), None))
        .collect();
    assert_eq!(host.queued_completions(), 20);

    common::drive_until_idle(&bridge, Duration::from_secs(5));
    for (n, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.expect("doubled"), json!(n * 2));
    }
    let region = bridge.shared_region();
    assert!(region.borrow().is_empty());
    assert_eq!(region.borrow().head(), HEAD_INIT);
}

#[tokio::test]
async fn more_than_max_records_still_completes() {
    common::init_tracing();
    let host = common::standard_host(RECOMMENDED_SIZE * 4);
    let bridge = Bridge::new(host.clone());
    bridge.register_json_completion("op_double").expect("known op");

    let total = MAX_RECORDS + 25;
    let calls: Vec<_> = (0..total)
        .map(|n| bridge.send_async("op_double", json!({ "n": n }), None))
        .collect();
    assert_eq!(bridge.outstanding_calls(), total);

    bridge.poll_host().expect("flush");
    assert_eq!(bridge.outstanding_calls(), 0);
    for (n, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.expect("doubled"), json!(n * 2));
    }
}

#[test]
fn completion_for_unknown_call_id_is_a_protocol_violation() {
    common::init_tracing();
    let host = common::standard_host(RECOMMENDED_SIZE);
    let bridge = Bridge::new(host.clone());
    let op_id = bridge.register_json_completion("op_double").expect("known op");

    let stray = protocol::encode_envelope(&Utf8Codec, &Envelope::ok(json!(1)).with_promise_id(99));
    host.queue_completion(op_id, stray);
    assert!(matches!(
        bridge.poll_host(),
        Err(BridgeError::Protocol(ProtocolViolation::UnknownCallId(99)))
    ));
}

#[test]
fn completion_without_handler_is_a_protocol_violation() {
    common::init_tracing();
    let host = common::standard_host(RECOMMENDED_SIZE);
    let bridge = Bridge::new(host.clone());
    let op_id = bridge.op_id("op_double").expect("known op");

    let _call = bridge.send_async("op_double", json!({"n": 1}), None);
    assert!(matches!(
        bridge.poll_host(),
        Err(BridgeError::Protocol(ProtocolViolation::MissingHandler(id))) if id == op_id
    ));
}

#[test]
fn direct_notification_bypasses_the_region() {
    common::init_tracing();
    let host = common::standard_host(RECOMMENDED_SIZE);
    let bridge = Bridge::new(host.clone());
    let op_id = bridge.register_json_completion("op_double").expect("known op");

    let call = bridge.send_async("op_double", json!({"n": 4}), None);
    let promise_id = call.promise_id().expect("waiting");
    let payload =
        protocol::encode_envelope(&Utf8Codec, &Envelope::ok(json!(8)).with_promise_id(promise_id));
    host.notify(op_id, Some(&payload)).expect("direct delivery");

    assert_eq!(bridge.outstanding_calls(), 0);
    assert!(bridge.shared_region().borrow().is_empty());
}

#[test]
fn second_completion_for_same_call_is_rejected() {
    common::init_tracing();
    let host = common::standard_host(RECOMMENDED_SIZE);
    let bridge = Bridge::new(host.clone());
    let op_id = bridge.register_json_completion("op_double").expect("known op");

    let call = bridge.send_async("op_double", json!({"n": 4}), None);
    let promise_id = call.promise_id().expect("waiting");
    bridge.poll_host().expect("first completion");

    let duplicate =
        protocol::encode_envelope(&Utf8Codec, &Envelope::ok(json!(8)).with_promise_id(promise_id));
    assert!(matches!(
        host.notify(op_id, Some(&duplicate)),
        Err(BridgeError::Protocol(ProtocolViolation::UnknownCallId(id))) if id == promise_id
    ));
}

#[tokio::test]
async fn stray_completion_does_not_strand_the_rest_of_the_batch() {
    common::init_tracing();
    // Room for two or three envelopes at a time.
    let host = common::standard_host(HEAD_INIT + 64);
    let bridge = Bridge::new(host.clone());
    let op_id = bridge.register_json_completion("op_double").expect("known op");

    let stray = protocol::encode_envelope(&Utf8Codec, &Envelope::ok(json!(1)).with_promise_id(99));
    host.queue_completion(op_id, stray);
    let calls: Vec<_> = (0..5)
        .map(|n| bridge.send_async("op_double", json!({ "n": n }), None))
        .collect();

    assert!(matches!(
        bridge.poll_host(),
        Err(BridgeError::Protocol(ProtocolViolation::UnknownCallId(99)))
    ));
    bridge.poll_host().expect("nothing left to fail");

    assert_eq!(bridge.outstanding_calls(), 0);
    assert_eq!(host.queued_completions(), 0);
    assert!(bridge.shared_region().borrow().is_empty());
    for (n, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.expect("doubled"), json!(n * 2));
    }
}

#[tokio::test]
async fn poll_drains_records_already_in_the_region() {
    common::init_tracing();
    let host = common::standard_host(RECOMMENDED_SIZE);
    // Answers later, through the region only.
    host.register_raw("op_later", |_, _| None).expect("register");
    let bridge = Bridge::new(host.clone());
    let op_id = bridge.register_json_completion("op_later").expect("known op");

    let call = bridge.send_async("op_later", json!({}), None);
    let promise_id = call.promise_id().expect("waiting");
    let payload =
        protocol::encode_envelope(&Utf8Codec, &Envelope::ok(json!("late")).with_promise_id(promise_id));
    bridge
        .shared_region()
        .borrow_mut()
        .push(op_id, &payload)
        .expect("push");
    assert_eq!(host.queued_completions(), 0);

    bridge.poll_host().expect("drain");
    assert_eq!(bridge.outstanding_calls(), 0);
    assert!(bridge.shared_region().borrow().is_empty());
    assert_eq!(call.await.expect("late"), json!("late"));
}
