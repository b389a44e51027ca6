//! End-to-end tests of `Device` over the scripted transport.
//!
//! Run with: `cargo test --package switchbot-core --test integration`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use switchbot_core::advertisement::Advertisement;
use switchbot_core::mock::Responder;
use switchbot_core::{
    Device, DeviceConfig, DeviceEvent, DeviceKey, DeviceProfile, DisconnectReason,
    EncryptionStrategy, Error, MockTransport, SessionCipher, StateMap, SwitchbotModel,
};

const KEY_ID: &str = "01";
const ENCRYPTION_KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";
const IV: [u8; 16] = [
    0xab, 0xcd, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
];
const HANDSHAKE: [u8; 8] = [0x57, 0x00, 0x00, 0x00, 0x0f, 0x21, 0x03, 0x01];

fn cipher() -> SessionCipher {
    SessionCipher::new(&DeviceKey::from_hex(ENCRYPTION_KEY).unwrap(), &IV).unwrap()
}

fn parsed(value: Value) -> StateMap {
    value.as_object().cloned().unwrap_or_default()
}

/// Plays an encrypted lock: answers the IV handshake, and encrypted
/// commands with status 1 plus an encrypted body.
fn lock_responder() -> Responder {
    Arc::new(|data: &[u8]| {
        if data == HANDSHAKE {
            let mut reply = vec![0x01, 0x00, 0x00, 0x00];
            reply.extend_from_slice(&IV);
            return Some(reply);
        }
        let plain = cipher().decrypt(data.get(4..)?);
        let body: Vec<u8> = match plain.as_slice() {
            // basic info: battery 90 %, firmware 4.5
            [0x02] => vec![0x5a, 0x2d],
            // lock info: one status byte
            [0x0f, 0x4f, 0x81, ..] => vec![0x42],
            _ => Vec::new(),
        };
        let mut reply = vec![0x01, IV[0], IV[1], IV[2]];
        reply.extend(cipher().encrypt(&body));
        Some(reply)
    })
}

fn lock_device(transport: &Arc<MockTransport>) -> Device<MockTransport> {
    Device::builder(
        Arc::clone(transport),
        transport.identity(),
        DeviceProfile::lock(SwitchbotModel::Lock).unwrap(),
    )
    .encryption(EncryptionStrategy::session(KEY_ID, ENCRYPTION_KEY).unwrap())
    .status_decoder(Arc::new(|block: &[u8]| {
        let mut map = StateMap::new();
        if let Some(status) = block.first() {
            map.insert("status".to_string(), json!(status));
        }
        map
    }))
    .build()
    .unwrap()
}

fn bot(transport: &Arc<MockTransport>) -> Device<MockTransport> {
    Device::new(
        Arc::clone(transport),
        transport.identity(),
        DeviceProfile::bot(),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_transient_faults_are_retried_with_reconnect() {
    let transport = Arc::new(MockTransport::new());
    transport.fail_next_write(Error::BusError("org.bluez.Error.Failed".into()));
    transport.fail_next_write(Error::Communication("write failed".into()));
    transport.push_reply([0x01, 0x64, 0x20]);
    let device = bot(&transport);

    let reply = device.send_command("5702", Some(2)).await.unwrap();
    assert_eq!(&reply[..], &[0x01, 0x64, 0x20]);
    assert_eq!(transport.writes().len(), 3);
    assert_eq!(transport.connect_count(), 3);
    assert_eq!(transport.disconnect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_report_last_failure() {
    let transport = Arc::new(MockTransport::new());
    let mut events = {
        let device = bot(&transport);
        let events = device.events();
        let err = device.send_command("570100", Some(0)).await.unwrap_err();
        let Error::RetriesExhausted { attempts, source, .. } = err else {
            panic!("expected exhausted retries");
        };
        assert_eq!(attempts, 1);
        assert!(matches!(*source, Error::Timeout { .. }));
        events
    };

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        saw_failure |= matches!(event, DeviceEvent::CommandFailed { .. });
    }
    assert!(saw_failure);
}

#[tokio::test(start_paused = true)]
async fn test_password_is_folded_into_commands() {
    let transport = Arc::new(MockTransport::new());
    transport.push_reply([0x01]);
    let device = Device::builder(
        Arc::clone(&transport),
        transport.identity(),
        DeviceProfile::bot(),
    )
    .password("hunter2")
    .build()
    .unwrap();

    device.send_command("570100", None).await.unwrap();
    let hash = switchbot_core::commands::password_hash("hunter2").unwrap();
    let expected = hex::decode(format!("5711{hash}00")).unwrap();
    assert_eq!(transport.writes(), vec![expected]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_commands_do_not_cross_resolve() {
    let transport = Arc::new(MockTransport::new());
    transport.set_responder(Arc::new(|data: &[u8]| Some(data.to_vec())));
    transport.set_reply_delay(Duration::from_millis(100));
    let device = bot(&transport);

    let (on, off) = tokio::join!(
        device.send_command("570101", None),
        device.send_command("570102", None),
    );
    assert_eq!(&on.unwrap()[..], &[0x57, 0x01, 0x01]);
    assert_eq!(&off.unwrap()[..], &[0x57, 0x01, 0x02]);
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_disconnect_then_reconnect() {
    let transport = Arc::new(MockTransport::new());
    transport.push_reply([0x01]);
    transport.push_reply([0x01]);
    let device = bot(&transport);
    let mut events = device.events();

    device.send_command("570100", None).await.unwrap();
    assert!(transport.is_connected());

    sleep(Duration::from_secs(9)).await;
    assert!(!transport.is_connected());

    device.send_command("570100", None).await.unwrap();
    assert_eq!(transport.connect_count(), 2);

    let mut reasons = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DeviceEvent::Disconnected { reason, .. } = event {
            reasons.push(reason);
        }
    }
    assert_eq!(reasons, vec![DisconnectReason::Idle]);
}

#[tokio::test(start_paused = true)]
async fn test_encrypted_command_wire_format() {
    let transport = Arc::new(MockTransport::new());
    transport.set_responder(lock_responder());
    let device = lock_device(&transport);

    let reply = device.send_command("570f4e01011000", None).await.unwrap();
    assert_eq!(&reply[..], &[0x01]);

    let writes = transport.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0], HANDSHAKE);

    let mut expected = vec![0x57, 0x01, IV[0], IV[1]];
    expected.extend(cipher().encrypt(&hex::decode("0f4e01011000").unwrap()));
    assert_eq!(writes[1], expected);
}

#[tokio::test(start_paused = true)]
async fn test_encrypted_reply_strips_iv_echo() {
    let transport = Arc::new(MockTransport::new());
    transport.set_responder(lock_responder());
    let device = lock_device(&transport);

    let reply = device.send_command("5702", None).await.unwrap();
    assert_eq!(&reply[..], &[0x01, 0x5a, 0x2d]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_forces_fresh_handshake() {
    let transport = Arc::new(MockTransport::new());
    transport.set_responder(lock_responder());
    let device = lock_device(&transport);

    device.send_command("5702", None).await.unwrap();
    device.send_command("5702", None).await.unwrap();
    transport.trigger_disconnect();
    device.send_command("5702", None).await.unwrap();

    let handshakes = transport
        .writes()
        .iter()
        .filter(|w| w.as_slice() == HANDSHAKE)
        .count();
    assert_eq!(handshakes, 2);
    assert_eq!(transport.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_handshake() {
    let transport = Arc::new(MockTransport::new());
    transport.push_reply([0x07]);
    let device = lock_device(&transport);

    let err = device.send_command("5702", Some(0)).await.unwrap_err();
    assert!(matches!(err, Error::EncryptionNotInitialized));
}

#[tokio::test(start_paused = true)]
async fn test_lock_updates_battery_and_handles_push() {
    let transport = Arc::new(MockTransport::new());
    transport.set_responder(lock_responder());
    let device = lock_device(&transport);
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let _sub = device.subscribe(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(device.lock().await.unwrap());
    assert_eq!(device.battery_percent(), Some(90));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    // enable notifications, lock, basic info
    assert_eq!(transport.writes().len(), 4);

    let mut push = vec![0x0f, 0x00, 0x00, 0x00];
    push.extend(cipher().encrypt(&[0x11]));
    transport.notify(&push);
    assert_eq!(device.value("status"), Some(json!(0x11)));
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // Same status again changes nothing
    transport.notify(&push);
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // Already enabled on this connection
    assert!(device.enable_notifications().await.unwrap());
    assert_eq!(transport.writes().len(), 4);
    assert!(device.disable_notifications().await.unwrap());
    assert_eq!(transport.writes().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_lock_basic_info_merges_status_block() {
    let transport = Arc::new(MockTransport::new());
    transport.set_responder(lock_responder());
    let device = lock_device(&transport);

    let info = device.get_basic_info().await.unwrap().unwrap();
    assert_eq!(info["status"], json!(0x42));
    assert_eq!(info["battery"], json!(90));
    assert_eq!(info["firmware"], json!(4.5));
}

#[tokio::test(start_paused = true)]
async fn test_verify_encryption_key() {
    let transport = Arc::new(MockTransport::new());
    transport.set_responder(lock_responder());
    let ok = Device::verify_encryption_key(
        Arc::clone(&transport),
        transport.identity(),
        SwitchbotModel::Lock,
        KEY_ID,
        ENCRYPTION_KEY,
    )
    .await
    .unwrap();
    assert!(ok);
    assert!(!transport.is_connected());

    let bad = Device::verify_encryption_key(
        Arc::clone(&transport),
        transport.identity(),
        SwitchbotModel::Lock,
        "1",
        ENCRYPTION_KEY,
    )
    .await
    .unwrap();
    assert!(!bad);
}

#[tokio::test(start_paused = true)]
async fn test_verify_encryption_key_refused_handshake() {
    let transport = Arc::new(MockTransport::new());
    transport.push_reply([0x00, 0x00, 0x00, 0x00]);
    let ok = Device::verify_encryption_key(
        Arc::clone(&transport),
        transport.identity(),
        SwitchbotModel::Lock,
        "02",
        ENCRYPTION_KEY,
    )
    .await
    .unwrap();
    assert!(!ok);
    assert_eq!(transport.writes().len(), 1);
    assert!(!transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_new_rejects_keyless_lock() {
    let transport = Arc::new(MockTransport::new());
    let result = Device::new(
        Arc::clone(&transport),
        transport.identity(),
        DeviceProfile::lock(SwitchbotModel::Lock).unwrap(),
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test(start_paused = true)]
async fn test_lock_requires_key() {
    let transport = Arc::new(MockTransport::new());
    let result = Device::builder(
        Arc::clone(&transport),
        transport.identity(),
        DeviceProfile::lock(SwitchbotModel::LockPro).unwrap(),
    )
    .build();
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[tokio::test(start_paused = true)]
async fn test_sequence_change_triggers_refresh() {
    let transport = Arc::new(MockTransport::new());
    transport.set_responder(lock_responder());
    let device = lock_device(&transport);
    let cancel = CancellationToken::new();
    let worker = device.spawn_refresh_worker(cancel.clone()).unwrap();
    assert!(device.spawn_refresh_worker(cancel.clone()).is_none());

    let broadcast = |seq: u64| {
        Advertisement::placeholder(transport.identity())
            .with_parsed(parsed(json!({"sequence_number": seq})))
    };

    device.update_from_advertisement(broadcast(1));
    sleep(Duration::from_millis(10)).await;
    assert!(transport.writes().is_empty());

    device.update_from_advertisement(broadcast(2));
    timeout(Duration::from_secs(30), async {
        while device.battery_percent().is_none() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(device.value("status"), Some(json!(0x42)));

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_fires_callbacks_and_events() {
    let transport = Arc::new(MockTransport::new());
    let device = bot(&transport);
    let mut events = device.events();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let sub = device.subscribe(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let adv = Advertisement::placeholder(transport.identity())
        .with_parsed(parsed(json!({"battery": 80, "switchMode": true})));
    device.update_from_advertisement(adv.clone());
    device.update_from_advertisement(adv);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(device.switch_mode(), Some(true));
    assert!(matches!(
        events.try_recv(),
        Ok(DeviceEvent::StateChanged { .. })
    ));

    sub.unsubscribe();
    device.update_from_advertisement(
        Advertisement::placeholder(transport.identity())
            .with_parsed(parsed(json!({"battery": 79}))),
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(device.battery_percent(), Some(79));
}

#[tokio::test(start_paused = true)]
async fn test_poll_needed_after_update() {
    let transport = Arc::new(MockTransport::new());
    transport.push_reply([0x01, 0x5a, 0x2d]);
    let device = Device::builder(
        Arc::clone(&transport),
        transport.identity(),
        DeviceProfile::bot(),
    )
    .config(DeviceConfig::default().passive_poll_interval(Duration::from_secs(86_400)))
    .build()
    .unwrap();

    assert!(device.poll_needed(None));
    device.update().await.unwrap();
    assert!(!device.poll_needed(None));

    tokio::time::advance(Duration::from_secs(7200)).await;
    assert!(!device.poll_needed(Some(Duration::from_secs(3600))));

    tokio::time::advance(Duration::from_secs(90_000 - 7200)).await;
    assert!(device.poll_needed(Some(Duration::from_secs(3600))));
}

#[tokio::test(start_paused = true)]
async fn test_missing_characteristic_clears_cache() {
    let transport = Arc::new(MockTransport::new());
    transport.set_missing_characteristic(true);
    let device = bot(&transport);

    let err = device.send_command("570100", Some(1)).await.unwrap_err();
    assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(transport.cache_clear_count(), 2);
    assert!(transport.writes().is_empty());
}
