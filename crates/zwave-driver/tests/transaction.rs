//! Integration tests for the transaction engine: completion semantics,
//! timeout and abort, NAK retry budget and CAN backoff, all driven over an
//! in-memory port.

mod common;

use std::time::{Duration, Instant};

use common::{driver, listening_node};
use zwave_driver::{ControllerEvent, DriverConfig};
use zwave_protocol::{
    requests, MessageClass, MessagePriority, MessageType, ACK, CAN, NAK,
    TRANSMIT_COMPLETE_OK, TRANSMIT_OPTIONS_STANDARD,
};

const HOME_ID: u32 = 0x00AA_BBCC;

fn completed(event: &ControllerEvent) -> bool {
    matches!(event, ControllerEvent::TransactionCompleted { .. })
}

#[test]
fn test_get_version_happy_path() {
    let (controller, stick, recorder) = driver(DriverConfig::default());

    controller.enqueue(requests::get_version());

    let sent = stick.next_frame(Duration::from_secs(2));
    assert_eq!(sent.message_class, MessageClass::GetVersion);
    assert_eq!(sent.message_type, MessageType::Request);

    // Byte-level ACK, then the version response.
    stick.send(&[ACK]);
    let mut payload = b"Z-Wave 2.78\0".to_vec();
    payload.push(0x01);
    stick.send_response(MessageClass::GetVersion, &payload);

    let event = recorder
        .wait_for(completed, Duration::from_secs(2))
        .expect("transaction should complete");
    let ControllerEvent::TransactionCompleted { message } = event else {
        unreachable!()
    };
    assert_eq!(message.message_class, MessageClass::GetVersion);

    // The host acknowledged the response frame, exactly once.
    stick.wait_for_control(ACK, Duration::from_secs(1));
    assert_eq!(controller.zwave_version(), "Z-Wave 2.78");
    assert_eq!(controller.library_type(), 0x01);
    assert_eq!(controller.ack_count(), 1);
    assert_eq!(controller.sof_count(), 1);
    assert!(matches!(
        stick.next_item(Duration::from_millis(150)),
        None
    ));

    controller.close();
}

#[test]
fn test_send_data_completes_on_callback_not_response() {
    let (controller, stick, recorder) = driver(DriverConfig::default());
    controller.nodes().insert(listening_node(HOME_ID, 5));

    controller
        .send_data(requests::send_data(5, &[0x20, 0x01], MessagePriority::Get))
        .unwrap();

    let sent = stick.next_frame(Duration::from_secs(2));
    assert_eq!(sent.message_class, MessageClass::SendData);
    // Addressing envelope, then the wire trailer: options and callback id.
    assert_eq!(&sent.payload[..4], &[5, 2, 0x20, 0x01]);
    assert_eq!(sent.payload[4], TRANSMIT_OPTIONS_STANDARD);
    assert_eq!(sent.payload[5], 1);

    stick.send(&[ACK]);
    stick.send_response(MessageClass::SendData, &[0x01]);

    // The response alone must not complete the transaction.
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(recorder.count(completed), 0);

    stick.send_request(MessageClass::SendData, &[1, TRANSMIT_COMPLETE_OK]);
    recorder
        .wait_for(completed, Duration::from_secs(2))
        .expect("callback should complete the transaction");

    controller.close();
}

#[test]
fn test_timeout_sends_abort_and_requeues() {
    let config = DriverConfig {
        response_timeout_ms: 200,
        ..DriverConfig::default()
    };
    let (controller, stick, _recorder) = driver(config);
    controller.nodes().insert(listening_node(HOME_ID, 5));

    controller
        .send_data(requests::send_data(5, &[0x20, 0x01], MessagePriority::Get))
        .unwrap();

    let first = stick.next_frame(Duration::from_secs(2));
    assert_eq!(first.message_class, MessageClass::SendData);

    // Say nothing; the engine must abort, then retry the same message.
    let abort = stick.next_frame(Duration::from_secs(2));
    assert_eq!(abort.message_class, MessageClass::SendDataAbort);

    let retry = stick.next_frame(Duration::from_secs(2));
    assert_eq!(retry.message_class, MessageClass::SendData);
    // Same message, same callback id.
    assert_eq!(retry.payload, first.payload);

    assert!(controller.timeout_count() >= 1);

    controller.close();
}

#[test]
fn test_can_storm_requeues_with_backoff() {
    let (controller, stick, recorder) = driver(DriverConfig::default());
    controller.nodes().insert(listening_node(HOME_ID, 5));

    controller
        .send_data(requests::send_data(5, &[0x20, 0x02], MessagePriority::Set))
        .unwrap();

    let mut last_payload = None;
    for round in 0..3 {
        let sent = stick.next_frame(Duration::from_secs(2));
        assert_eq!(sent.message_class, MessageClass::SendData, "round {}", round);
        last_payload = Some(sent.payload.clone());

        let cancelled_at = Instant::now();
        stick.send(&[CAN]);

        // The engine re-enqueues and pauses before the next take.
        let resent = stick.next_frame(Duration::from_secs(2));
        assert!(
            cancelled_at.elapsed() >= Duration::from_millis(80),
            "round {}: resend came before the backoff", round
        );
        assert_eq!(resent.payload, last_payload.clone().unwrap(), "round {}", round);
        // Put the frame back as the next round's "sent".
        stick.send(&[CAN]);
    }

    // Drain the storm: 3 asserted rounds sent 6 CANs in total.
    let deadline = Instant::now() + Duration::from_secs(3);
    while controller.can_count() < 6 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(controller.can_count(), 6);
    assert_eq!(recorder.count(completed), 0);

    controller.close();
}

#[test]
fn test_nak_spends_attempt_budget_then_discards() {
    let (controller, stick, _recorder) = driver(DriverConfig::default());

    controller.enqueue(requests::get_version());

    // Initial send plus three requeues, then the message is given up.
    for round in 0..4 {
        let sent = stick.next_frame(Duration::from_secs(2));
        assert_eq!(sent.message_class, MessageClass::GetVersion, "round {}", round);
        stick.send(&[NAK]);
    }
    stick.assert_no_frame_within(Duration::from_millis(400));
    assert_eq!(controller.nak_count(), 4);
    assert_eq!(controller.send_queue_length(), 0);

    controller.close();
}

#[test]
fn test_single_transaction_in_flight() {
    let (controller, stick, _recorder) = driver(DriverConfig::default());

    controller.enqueue(requests::get_version());
    controller.enqueue(requests::memory_get_id());

    let first = stick.next_frame(Duration::from_secs(2));
    assert_eq!(first.message_class, MessageClass::GetVersion);

    // The second message must wait for the first transaction to finish.
    stick.assert_no_frame_within(Duration::from_millis(300));

    let mut payload = b"Z-Wave 2.78\0".to_vec();
    payload.push(0x01);
    stick.send_response(MessageClass::GetVersion, &payload);

    let second = stick.next_frame(Duration::from_secs(2));
    assert_eq!(second.message_class, MessageClass::MemoryGetId);

    controller.close();
}

#[test]
fn test_out_of_frame_byte_draws_nak() {
    let (controller, stick, _recorder) = driver(DriverConfig::default());

    // The receive loop opens with a resync NAK.
    stick.wait_for_control(NAK, Duration::from_secs(1));

    stick.send(&[0x7F]);
    stick.wait_for_control(NAK, Duration::from_secs(1));
    assert_eq!(controller.oof_count(), 1);

    controller.close();
}

#[test]
fn test_corrupt_frame_is_dropped_without_ack() {
    let (controller, stick, recorder) = driver(DriverConfig::default());

    controller.enqueue(requests::get_version());
    let _ = stick.next_frame(Duration::from_secs(2));

    // A response with a flipped payload byte: checksum no longer matches.
    let mut payload = b"Z-Wave 2.78\0".to_vec();
    payload.push(0x01);
    let mut raw = common::raw_frame(0x01, MessageClass::GetVersion.key(), &payload);
    let last = raw.len() - 2;
    raw[last] ^= 0x40;
    stick.send(&raw);

    // No ACK and no completion; the engine is still waiting.
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(recorder.count(completed), 0);
    assert!(stick.next_item(Duration::from_millis(100)).is_none());
    assert_eq!(controller.zwave_version(), "");

    controller.close();
}
