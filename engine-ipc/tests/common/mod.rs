//! Loopback engine for driving `EngineIpc` end to end on the build host.
//!
//! The "engine" is a second `Ivc` endpoint mapped over the queues a channel
//! carved, with receive and transmit swapped. Doorbells are recorded by
//! [`TestDoorbell`]; [`TestDoorbell::raise`] plays the engine ringing the host.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use engine_abi::MessageHeader;
use engine_ipc::{
    ChannelType, Clock, Doorbell, EngineIpc, IpcConfig, IpcError, QueueGeometry, SharedRegion,
    SignalHandler, SignalSpec,
};
use ivc::Ivc;
use zerocopy::IntoBytes;

/// Admin geometry used by every test: 8 frames of 128 bytes.
pub const ADMIN_GEOMETRY: QueueGeometry = QueueGeometry::new(8, 128);

/// Largest admin payload with [`ADMIN_GEOMETRY`].
pub const ADMIN_MAX_PAYLOAD: usize = 128 - MessageHeader::SIZE;

/// Enough room for all three default channels.
pub const REGION_SIZE: u32 = 64 * 1024;

#[derive(Default)]
pub struct TestDoorbell {
    rings: Mutex<HashMap<SignalSpec, usize>>,
    handlers: Mutex<HashMap<SignalSpec, SignalHandler>>,
    pub refuse_bind: AtomicBool,
}

impl TestDoorbell {
    pub fn rings(&self, signal: SignalSpec) -> usize {
        self.rings.lock().unwrap().get(&signal).copied().unwrap_or(0)
    }

    pub fn is_bound(&self, signal: SignalSpec) -> bool {
        self.handlers.lock().unwrap().contains_key(&signal)
    }

    /// Ring the host from the engine side. Returns whether anyone listened.
    pub fn raise(&self, signal: SignalSpec) -> bool {
        let handler = self.handlers.lock().unwrap().get(&signal).cloned();
        match handler {
            Some(handler) => {
                handler.fire();
                true
            }
            None => false,
        }
    }
}

impl Doorbell for TestDoorbell {
    fn ring(&self, signal: &SignalSpec) {
        *self.rings.lock().unwrap().entry(*signal).or_default() += 1;
    }

    fn bind(&self, signal: &SignalSpec, handler: SignalHandler) -> engine_ipc::Result<()> {
        if self.refuse_bind.load(Ordering::SeqCst) {
            return Err(IpcError::BindFailed(handler.channel_type()));
        }
        self.handlers.lock().unwrap().insert(*signal, handler);
        Ok(())
    }

    fn unbind(&self, signal: &SignalSpec) {
        self.handlers.lock().unwrap().remove(signal);
    }
}

pub struct StdClock {
    start: Instant,
}

impl Default for StdClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for StdClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn delay_us(&self, us: u32) {
        thread::sleep(Duration::from_micros(u64::from(us)));
    }
}

/// Default configuration with the test admin geometry and short timeouts.
pub fn test_config() -> IpcConfig {
    let mut config = IpcConfig::default();
    config.descriptors[ChannelType::Admin.index()].geometry = ADMIN_GEOMETRY;
    config.rpc_timeout = Duration::from_millis(200);
    config
}

pub struct Harness {
    pub ipc: EngineIpc,
    pub doorbell: Arc<TestDoorbell>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(REGION_SIZE, test_config())
    }

    pub fn with(region_size: u32, config: IpcConfig) -> Self {
        let region = SharedRegion::allocate(region_size).unwrap();
        let doorbell = Arc::new(TestDoorbell::default());
        let ipc = EngineIpc::new(region, doorbell.clone(), Arc::new(StdClock::default()), config);
        Self { ipc, doorbell }
    }

    pub fn to_peer(&self, channel_type: ChannelType) -> SignalSpec {
        self.ipc.config().descriptor(channel_type).to_peer
    }

    pub fn from_peer(&self, channel_type: ChannelType) -> SignalSpec {
        self.ipc.config().descriptor(channel_type).from_peer
    }

    /// Map the engine's end of an initialized channel.
    pub fn peer(&self, channel_type: ChannelType) -> PeerEndpoint {
        let info = self.ipc.queue_info(channel_type).unwrap();
        // Owned regions are identity mapped.
        let rx = NonNull::new(info.tx_addr as *mut u8).unwrap();
        let tx = NonNull::new(info.rx_addr as *mut u8).unwrap();
        let ring = unsafe { Ivc::new(rx, tx, info.frame_count, info.frame_size) }.unwrap();
        PeerEndpoint {
            ring,
            has_header: self.ipc.config().descriptor(channel_type).has_msg_header(),
        }
    }

    /// Run `channel_reset` while the engine answers the handshake.
    pub fn reset_with(&self, channel_type: ChannelType, peer: &mut PeerEndpoint) {
        let done = AtomicBool::new(false);
        thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    peer.ring.is_peer_unacknowledged();
                    thread::sleep(Duration::from_micros(10));
                }
            });
            let result = self.ipc.channel_reset(channel_type);
            done.store(true, Ordering::SeqCst);
            result.unwrap();
        });
        // The engine may still be one step behind.
        peer.ring.is_peer_unacknowledged();
    }

    /// Initialize and synchronize a channel, returning the engine's end.
    pub fn connect(&self, channel_type: ChannelType) -> PeerEndpoint {
        self.ipc.channel_init(channel_type).unwrap();
        let mut peer = self.peer(channel_type);
        self.reset_with(channel_type, &mut peer);
        peer
    }
}

/// The engine's end of one channel.
pub struct PeerEndpoint {
    pub ring: Ivc,
    has_header: bool,
}

impl PeerEndpoint {
    pub fn send(&mut self, payload: &[u8]) -> Result<(), ivc::IvcError> {
        let mut frame = self.ring.next_write_frame()?;
        let mut offset = 0;
        if self.has_header {
            frame.write(0, MessageHeader::new(payload.len() as u32).as_bytes())?;
            offset = MessageHeader::SIZE;
        }
        frame.write(offset, payload)?;
        frame.commit();
        Ok(())
    }

    pub fn recv(&mut self) -> Option<Vec<u8>> {
        self.take().map(|(payload, _)| payload)
    }

    /// Like [`PeerEndpoint::recv`], also reporting whether the ring was full
    /// before the frame was released.
    pub fn take(&mut self) -> Option<(Vec<u8>, bool)> {
        let frame = self.ring.next_read_frame().ok()?;
        let (offset, len) = if self.has_header {
            let mut header = [0u8; MessageHeader::SIZE];
            frame.read(0, &mut header).ok()?;
            (MessageHeader::SIZE, MessageHeader::parse(&header)?.length as usize)
        } else {
            (0, frame.capacity())
        };
        let mut payload = vec![0u8; len];
        frame.read(offset, &mut payload).ok()?;
        let was_full = frame.release();
        Some((payload, was_full))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Send every request back as the reply.
    Echo,
    /// Consume requests and never answer.
    Silent,
    /// Ring the host when a request frees a full ring, then echo it a little
    /// later.
    RoomThenEcho,
}

/// Engine thread serving one channel until dropped.
pub struct Engine {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn spawn(
        mut peer: PeerEndpoint,
        doorbell: Arc<TestDoorbell>,
        from_peer: SignalSpec,
        behavior: Behavior,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    peer.ring.is_peer_unacknowledged();
                    if let Some((request, was_full)) = peer.take() {
                        match behavior {
                            Behavior::Echo => {
                                peer.send(&request).unwrap();
                                doorbell.raise(from_peer);
                            }
                            Behavior::RoomThenEcho => {
                                if was_full {
                                    doorbell.raise(from_peer);
                                }
                                thread::sleep(Duration::from_millis(5));
                                peer.send(&request).unwrap();
                                doorbell.raise(from_peer);
                            }
                            Behavior::Silent => {}
                        }
                    }
                    thread::sleep(Duration::from_micros(20));
                }
            })
        };
        Self { stop, thread: Some(thread) }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Poll `condition` for up to a second.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_micros(50));
    }
    false
}
