mod common;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::{Behavior, Engine, Harness, REGION_SIZE, eventually, test_config};
use engine_ipc::{ChannelType, ClientId, IpcError, RpcMessage, SignalEvent, WaitKind};

#[test]
fn sync_request_gets_reply() {
    let harness = Harness::new();
    let peer = harness.connect(ChannelType::Admin);
    let _engine = Engine::spawn(
        peer,
        harness.doorbell.clone(),
        harness.from_peer(ChannelType::Admin),
        Behavior::Echo,
    );

    let mut reply = [0u8; 64];
    let len = harness
        .ipc
        .send_message_sync(ChannelType::Admin, RpcMessage { tx: b"ping", rx: &mut reply })
        .unwrap();

    assert_eq!(&reply[..len], b"ping");
    assert_eq!(harness.ipc.current_wait_kind(ChannelType::Admin), None);
}

#[test]
fn back_to_back_requests() {
    let harness = Harness::new();
    let peer = harness.connect(ChannelType::Rm);
    let _engine = Engine::spawn(
        peer,
        harness.doorbell.clone(),
        harness.from_peer(ChannelType::Rm),
        Behavior::Echo,
    );

    for i in 0..20u8 {
        let request = [i; 32];
        let mut reply = [0u8; 32];
        let len = harness
            .ipc
            .send_message_sync(ChannelType::Rm, RpcMessage { tx: &request, rx: &mut reply })
            .unwrap();
        assert_eq!(len, 32);
        assert_eq!(reply, request);
    }
}

#[test]
fn doorbell_for_freed_space_does_not_end_request() {
    let harness = Harness::new();
    let peer = harness.connect(ChannelType::Rm);
    let _engine = Engine::spawn(
        peer,
        harness.doorbell.clone(),
        harness.from_peer(ChannelType::Rm),
        Behavior::RoomThenEcho,
    );

    // Rm has a single frame, so every request fills the ring.
    for _ in 0..3 {
        let mut reply = [0u8; 16];
        let len = harness
            .ipc
            .send_message_sync(ChannelType::Rm, RpcMessage { tx: b"pong", rx: &mut reply })
            .unwrap();
        assert_eq!(&reply[..len], b"pong");
    }
    assert_eq!(harness.ipc.current_wait_kind(ChannelType::Rm), None);
}

#[test]
fn timeout_clears_wait() {
    let harness = Harness::new();
    let peer = harness.connect(ChannelType::Admin);
    let _engine = Engine::spawn(
        peer,
        harness.doorbell.clone(),
        harness.from_peer(ChannelType::Admin),
        Behavior::Silent,
    );

    let mut reply = [0u8; 16];
    assert_eq!(
        harness
            .ipc
            .send_message_sync(ChannelType::Admin, RpcMessage { tx: b"hello?", rx: &mut reply }),
        Err(IpcError::Timeout)
    );
    assert_eq!(harness.ipc.current_wait_kind(ChannelType::Admin), None);
}

#[test]
fn second_request_while_waiting_is_rejected() {
    let mut config = test_config();
    config.rpc_timeout = Duration::from_millis(500);
    let harness = Harness::with(REGION_SIZE, config);
    let _peer = harness.connect(ChannelType::Admin);

    thread::scope(|scope| {
        let first = scope.spawn(|| {
            let mut reply = [0u8; 16];
            harness
                .ipc
                .send_message_sync(ChannelType::Admin, RpcMessage { tx: b"first", rx: &mut reply })
        });

        assert!(eventually(|| {
            harness.ipc.current_wait_kind(ChannelType::Admin) == Some(WaitKind::RpcReply)
        }));
        let mut reply = [0u8; 16];
        assert_eq!(
            harness
                .ipc
                .send_message_sync(ChannelType::Admin, RpcMessage { tx: b"second", rx: &mut reply }),
            Err(IpcError::WaitInProgress(WaitKind::RpcReply))
        );
        // The wait still belongs to the first caller.
        assert_eq!(
            harness.ipc.current_wait_kind(ChannelType::Admin),
            Some(WaitKind::RpcReply)
        );

        assert_eq!(first.join().unwrap(), Err(IpcError::Timeout));
    });
    assert_eq!(harness.ipc.current_wait_kind(ChannelType::Admin), None);
}

#[test]
fn failed_send_starts_no_wait() {
    let harness = Harness::new();
    harness.ipc.channel_init(ChannelType::Admin).unwrap();

    let mut reply = [0u8; 16];
    assert_eq!(
        harness
            .ipc
            .send_message_sync(ChannelType::Admin, RpcMessage { tx: b"unsynced", rx: &mut reply }),
        Err(IpcError::NotSynced(ChannelType::Admin))
    );
    assert_eq!(harness.ipc.current_wait_kind(ChannelType::Admin), None);
}

#[test]
fn boot_event_wakes_waiter() {
    let harness = Harness::new();
    harness.ipc.channel_init(ChannelType::Admin).unwrap();
    let signal = harness.from_peer(ChannelType::Admin);

    thread::scope(|scope| {
        let waiter = scope.spawn(|| harness.ipc.wait_for_event(ChannelType::Admin, WaitKind::BootComplete));

        assert!(eventually(|| {
            harness.ipc.current_wait_kind(ChannelType::Admin) == Some(WaitKind::BootComplete)
        }));
        assert!(harness.doorbell.raise(signal));

        assert_eq!(waiter.join().unwrap(), Ok(()));
    });
    assert_eq!(harness.ipc.current_wait_kind(ChannelType::Admin), None);
}

#[test]
fn event_waits_are_admin_only() {
    let harness = Harness::new();
    harness.ipc.init_all().unwrap();

    assert_eq!(
        harness.ipc.wait_for_event(ChannelType::Rm, WaitKind::LogEvent),
        Err(IpcError::UnsupportedWait {
            channel: ChannelType::Rm,
            kind: WaitKind::LogEvent,
        })
    );
    assert_eq!(
        harness.ipc.wait_for_event(ChannelType::Admin, WaitKind::RpcReply),
        Err(IpcError::UnsupportedWait {
            channel: ChannelType::Admin,
            kind: WaitKind::RpcReply,
        })
    );
}

#[test]
fn unsolicited_messages_reach_event_handler() {
    let harness = Harness::new();
    let mut admin = harness.connect(ChannelType::Admin);
    let mut notify = harness.connect(ChannelType::RmNotify);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    harness.ipc.set_event_handler(move |event| sink.lock().unwrap().push(event));

    admin.send(b"thermal").unwrap();
    assert!(harness.doorbell.raise(harness.from_peer(ChannelType::Admin)));
    let frame_size = harness.ipc.queue_info(ChannelType::RmNotify).unwrap().frame_size as usize;
    notify.send(&vec![1u8; frame_size]).unwrap();
    assert!(harness.doorbell.raise(harness.from_peer(ChannelType::RmNotify)));

    assert_eq!(
        *events.lock().unwrap(),
        [
            SignalEvent::AdminAsyncEvent,
            SignalEvent::Notification(ChannelType::RmNotify),
        ]
    );
}

#[test]
fn stray_doorbells_are_ignored() {
    let harness = Harness::new();
    let _peer = harness.connect(ChannelType::Rm);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    harness.ipc.set_event_handler(move |event| sink.lock().unwrap().push(event));

    assert!(harness.doorbell.raise(harness.from_peer(ChannelType::Rm)));
    harness.ipc.handle_signal(ChannelType::RmNotify);
    assert!(events.lock().unwrap().is_empty());

    // Late doorbells after teardown have nowhere to go.
    harness.ipc.channel_deinit(ChannelType::Rm);
    assert!(!harness.doorbell.raise(harness.from_peer(ChannelType::Rm)));
}

#[test]
fn pooled_client_request() {
    let harness = Harness::new();
    let peer = harness.connect(ChannelType::Admin);
    let _engine = Engine::spawn(
        peer,
        harness.doorbell.clone(),
        harness.from_peer(ChannelType::Admin),
        Behavior::Echo,
    );
    let pools = harness.ipc.client_pools();

    let mut buffer = pools.acquire(ClientId::Perf).unwrap();
    let other = pools.acquire(ClientId::Perf).unwrap();
    assert_eq!(pools.acquire(ClientId::Perf).err(), Some(IpcError::Busy(ClientId::Perf)));

    buffer.tx_mut()[..9].copy_from_slice(b"read pmu0");
    let len = harness.ipc.send_client_sync(&mut buffer, 9).unwrap();
    assert_eq!(&buffer.rx()[..len], b"read pmu0");

    let too_long = buffer.tx().len() + 1;
    assert!(matches!(
        harness.ipc.send_client_sync(&mut buffer, too_long),
        Err(IpcError::MessageTooLarge { .. })
    ));

    buffer.release();
    other.release();
    assert_eq!(pools.get(ClientId::Perf).in_use(), 0);
}
