//! The driver instance: channel lifecycle, messaging and doorbell dispatch.
//!
//! [`EngineIpc`] is a cheap handle around shared state. Doorbell handlers keep
//! only a weak reference to that state and upgrade it when they fire, which is
//! how a callback that knows nothing but its channel type finds its owner.

use alloc::sync::Arc;

use engine_abi::{ChannelType, WaitKind};
use log::{debug, error, info, trace, warn};
use spinning_top::Spinlock;

use crate::channel::{Channel, QueueInfo};
use crate::config::IpcConfig;
use crate::dispatch::SignalEvent;
use crate::error::{IpcError, Result};
use crate::pool::{ClientBuffer, ClientPools};
use crate::region::SharedRegion;
use crate::registry::ChannelRegistry;
use crate::signal::{Doorbell, SignalHandler, SignalPath};
use crate::wait::{Clock, WaitConditions};

/// Callback for doorbells that do not complete a wait.
pub type EventHandler = Arc<dyn Fn(SignalEvent) + Send + Sync>;

/// One synchronous request: the payload to send and where to put the reply.
pub struct RpcMessage<'a> {
    pub tx: &'a [u8],
    pub rx: &'a mut [u8],
}

pub(crate) struct IpcShared {
    config: IpcConfig,
    registry: ChannelRegistry,
    /// Also serializes `channel_init` and `channel_deinit`.
    region: Spinlock<SharedRegion>,
    waits: WaitConditions,
    doorbell: Arc<dyn Doorbell>,
    clock: Arc<dyn Clock>,
    pools: ClientPools,
    event_handler: Spinlock<Option<EventHandler>>,
}

/// Host side of the engine IPC link.
#[derive(Clone)]
pub struct EngineIpc {
    shared: Arc<IpcShared>,
}

impl EngineIpc {
    /// Create a driver over `region`. No channel is initialized yet.
    pub fn new(
        region: SharedRegion,
        doorbell: Arc<dyn Doorbell>,
        clock: Arc<dyn Clock>,
        config: IpcConfig,
    ) -> Self {
        let admin = config.descriptor(ChannelType::Admin);
        let pools = ClientPools::new(config.pool_slots, admin.max_payload());
        let (iova, size) = region.device_address();
        info!("ipc: shared region at {:#x}, {} bytes", iova, size);

        Self {
            shared: Arc::new(IpcShared {
                registry: ChannelRegistry::new(config.descriptors),
                region: Spinlock::new(region),
                waits: WaitConditions::new(),
                doorbell,
                clock,
                pools,
                event_handler: Spinlock::new(None),
                config,
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<IpcShared>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &IpcConfig {
        &self.shared.config
    }

    fn channel(&self, channel_type: ChannelType) -> Result<Arc<Channel>> {
        self.shared.registry.get(channel_type).ok_or_else(|| {
            if self.shared.registry.descriptor(channel_type).is_valid() {
                IpcError::NotInitialized(channel_type)
            } else {
                IpcError::Disabled(channel_type)
            }
        })
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Bind, carve and publish the channel of this kind.
    ///
    /// A channel disabled in the configuration is skipped and reported as
    /// success. On failure nothing is published and the doorbell is released.
    pub fn channel_init(&self, channel_type: ChannelType) -> Result<()> {
        let descriptor = *self.shared.registry.descriptor(channel_type);
        if !descriptor.is_valid() {
            debug!("{}: disabled, skipping init", channel_type.name());
            return Ok(());
        }

        let mut region = self.shared.region.lock();
        if self.shared.registry.is_published(channel_type) {
            return Err(IpcError::AlreadyInitialized(channel_type));
        }

        let handler = SignalHandler::new(Arc::downgrade(&self.shared), channel_type);
        let signal = SignalPath::bind(&descriptor, self.shared.doorbell.clone(), handler)?;
        let channel = Channel::open(descriptor, &mut region, signal).inspect_err(|err| {
            error!("{}: init failed: {}", channel_type.name(), err);
        })?;
        let info = channel.queue_info();
        self.shared.registry.publish(Arc::new(channel))?;

        info!(
            "{}: {} x {} byte frames, rx {:#x}, tx {:#x}",
            channel_type.name(),
            info.frame_count,
            info.frame_size,
            info.rx_addr,
            info.tx_addr
        );
        Ok(())
    }

    /// Tear down the channel of this kind. Its region space is not reused.
    ///
    /// Callers must not have a wait outstanding on the channel.
    pub fn channel_deinit(&self, channel_type: ChannelType) {
        let _region = self.shared.region.lock();
        let Some(channel) = self.shared.registry.remove(channel_type) else {
            debug!("{}: deinit of uninitialized channel", channel_type.name());
            return;
        };
        if let Some(kind) = channel.current_wait() {
            warn!("{}: deinit with {:?} wait outstanding", channel_type.name(), kind);
        }
        channel.close();
        info!("{}: deinitialized", channel_type.name());
    }

    /// Initialize every channel in table order.
    ///
    /// If one fails, the ones before it are torn down again.
    pub fn init_all(&self) -> Result<()> {
        for (i, channel_type) in ChannelType::ALL.iter().enumerate() {
            if let Err(err) = self.channel_init(*channel_type) {
                for done in ChannelType::ALL[..i].iter().rev() {
                    self.channel_deinit(*done);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn deinit_all(&self) {
        for channel_type in ChannelType::ALL.iter().rev() {
            self.channel_deinit(*channel_type);
        }
    }

    // -------------------------------------------------------------------------
    // Reset handshake
    // -------------------------------------------------------------------------

    /// Poll the handshake once. Also re-rings the engine.
    ///
    /// Reports `false` for channels that are not initialized.
    pub fn channel_is_ready(&self, channel_type: ChannelType) -> bool {
        self.shared
            .registry
            .get(channel_type)
            .is_some_and(|channel| channel.poll_ready())
    }

    pub fn channel_is_synced(&self, channel_type: ChannelType) -> bool {
        self.shared
            .registry
            .get(channel_type)
            .is_some_and(|channel| channel.is_synced())
    }

    /// Re-establish the channel with the engine.
    ///
    /// Polls until the engine acknowledges, or until
    /// [`IpcConfig::reset_timeout`] if one is set.
    pub fn channel_reset(&self, channel_type: ChannelType) -> Result<()> {
        let channel = self.channel(channel_type)?;
        let clock = &*self.shared.clock;
        let config = &self.shared.config;

        channel.begin_reset();
        let deadline = config.reset_timeout.map(|timeout| clock.now().saturating_add(timeout));
        while !channel.poll_ready() {
            if deadline.is_some_and(|deadline| clock.now() >= deadline) {
                warn!("{}: engine did not acknowledge reset", channel_type.name());
                return Err(IpcError::ResetTimeout);
            }
            clock.delay_us(config.reset_poll_interval_us);
        }
        channel.mark_synced();

        info!("{}: synchronized", channel_type.name());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Messaging
    // -------------------------------------------------------------------------

    pub fn send_message(&self, channel_type: ChannelType, data: &[u8]) -> Result<()> {
        self.channel(channel_type)?.send(data)
    }

    /// Read the oldest pending message. `Empty` means none has arrived.
    pub fn receive_message(&self, channel_type: ChannelType, out: &mut [u8]) -> Result<usize> {
        self.channel(channel_type)?.receive(out)
    }

    /// Send a request and block until the engine replies.
    ///
    /// Returns the reply length. On timeout the reply, if it ever arrives,
    /// stays queued.
    pub fn send_message_sync(&self, channel_type: ChannelType, message: RpcMessage<'_>) -> Result<usize> {
        let channel = self.channel(channel_type)?;
        let config = &self.shared.config;

        // Armed first so a fast reply is not taken for a stray doorbell.
        let guard = channel.arm_wait(WaitKind::RpcReply, &self.shared.waits)?;
        channel.send(message.tx)?;

        let waited = self.shared.waits.wait(
            channel_type,
            WaitKind::RpcReply,
            config.rpc_timeout,
            &*self.shared.clock,
            config.wait_poll_interval_us,
        );
        drop(guard);

        if let Err(err) = waited {
            warn!("{}: no reply within {:?}", channel_type.name(), config.rpc_timeout);
            return Err(err);
        }
        channel.receive(message.rx)
    }

    /// Block until the engine raises `kind` on the admin channel.
    pub fn wait_for_event(&self, channel_type: ChannelType, kind: WaitKind) -> Result<()> {
        if channel_type != ChannelType::Admin || kind == WaitKind::RpcReply {
            return Err(IpcError::UnsupportedWait { channel: channel_type, kind });
        }
        let channel = self.channel(channel_type)?;
        let config = &self.shared.config;

        let _guard = channel.arm_wait(kind, &self.shared.waits)?;
        self.shared.waits.wait(
            channel_type,
            kind,
            config.rpc_timeout,
            &*self.shared.clock,
            config.wait_poll_interval_us,
        )
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn queue_info(&self, channel_type: ChannelType) -> Result<QueueInfo> {
        Ok(self.channel(channel_type)?.queue_info())
    }

    /// Engine-visible base address and size of the shared region.
    pub fn region_device_address(&self) -> (u64, u32) {
        self.shared.region.lock().device_address()
    }

    /// Bytes of the shared region not yet carved.
    pub fn region_remaining(&self) -> usize {
        self.shared.region.lock().remaining()
    }

    pub fn is_data_available(&self, channel_type: ChannelType) -> bool {
        self.shared
            .registry
            .get(channel_type)
            .is_some_and(|channel| channel.is_data_available())
    }

    /// Kind of wait a caller is blocked on, `None` if nobody is.
    pub fn current_wait_kind(&self, channel_type: ChannelType) -> Option<WaitKind> {
        self.shared
            .registry
            .get(channel_type)
            .and_then(|channel| channel.current_wait())
    }

    // -------------------------------------------------------------------------
    // Doorbells
    // -------------------------------------------------------------------------

    /// Handle a doorbell from the engine on `channel_type`.
    ///
    /// Never fails: doorbells for unknown channels or with nothing to do are
    /// logged and dropped.
    pub fn handle_signal(&self, channel_type: ChannelType) {
        let Some(channel) = self.shared.registry.get(channel_type) else {
            warn!("{}: doorbell on uninitialized channel", channel_type.name());
            return;
        };
        let (wait, data_available) = channel.signal_snapshot();
        self.dispatch(SignalEvent::classify(channel_type, wait, data_available));
    }

    fn dispatch(&self, event: SignalEvent) {
        if let Some((channel_type, kind)) = event.wake_target() {
            trace!("{}: waking {:?} wait", channel_type.name(), kind);
            self.shared.waits.signal(channel_type, kind);
            return;
        }
        if let SignalEvent::Stray(channel_type) = event {
            debug!("{}: stray doorbell", channel_type.name());
            return;
        }

        let handler = self.shared.event_handler.lock().clone();
        match handler {
            Some(handler) => (*handler)(event),
            None => debug!("unhandled {:?}", event),
        }
    }

    /// Receive events that do not complete a wait.
    ///
    /// The handler runs in doorbell context and must not block.
    pub fn set_event_handler(&self, handler: impl Fn(SignalEvent) + Send + Sync + 'static) {
        *self.shared.event_handler.lock() = Some(Arc::new(handler));
    }

    pub fn clear_event_handler(&self) {
        self.shared.event_handler.lock().take();
    }

    // -------------------------------------------------------------------------
    // Admin clients
    // -------------------------------------------------------------------------

    pub fn client_pools(&self) -> &ClientPools {
        &self.shared.pools
    }

    /// Run one admin request out of a pooled buffer.
    ///
    /// Sends the first `tx_len` bytes of the request buffer and leaves the
    /// reply at the start of the reply buffer.
    pub fn send_client_sync(&self, buffer: &mut ClientBuffer<'_>, tx_len: usize) -> Result<usize> {
        let client = buffer.client();
        let (tx, rx) = buffer.split_mut();
        let tx = tx
            .get(..tx_len)
            .ok_or(IpcError::MessageTooLarge { size: tx_len, max: tx.len() })?;
        trace!("{:?}: request of {} bytes", client, tx_len);
        self.send_message_sync(ChannelType::Admin, RpcMessage { tx, rx })
    }
}
