//! The driver composition root: lifecycle state machine, listener registry,
//! and callback dispatch.
//!
//! Two execution contexts meet here. The control thread drives lifecycle
//! transitions and queries; the native engine's real-time thread delivers
//! per-block callbacks through [`DriverCallbacks`]. Both sides share one
//! coarse control lock. The dispatch path holds it only long enough to
//! snapshot the active channel set and listener list, never across listener
//! code or teardown.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{BufferSizeBounds, Latencies, NativeDriver};
use crate::channel::{BufferSlot, Channel, ChannelRegistry, Direction};
use crate::state::DriverState;
use crate::{AsioError, DriverInfo, HostOptions};

/// Callbacks a driver host receives. Implemented by application code and
/// registered with [`AsioDriver::add_listener`].
///
/// `buffer_switch` runs on the native engine's real-time thread;
/// implementations must not block or allocate unboundedly. The
/// control-plane notifications default to no-ops.
pub trait AsioDriverListener: Send + Sync {
    /// The hardware sample rate changed, by user action or a source switch.
    fn sample_rate_did_change(&self, sample_rate: f64) {
        let _ = sample_rate;
    }

    /// The driver hit an unexpected failure or was reconfigured and needs
    /// to be torn down and reinitialised. The host schedules the teardown
    /// itself after this notification returns; listeners only need to
    /// recreate buffers and restart once the driver is back at
    /// `INITIALIZED`.
    fn reset_request(&self) {}

    /// The driver detected buffer underruns or overruns. Informational; no
    /// automatic action is taken.
    fn resync_request(&self) {}

    /// The driver has a new preferred block size. The host should return to
    /// `INITIALIZED` and recreate buffers to honour it.
    fn buffer_size_changed(&self, block_frames: u32) {
        let _ = block_frames;
    }

    /// Input or output latencies changed.
    fn latencies_changed(&self, input_latency: u32, output_latency: u32) {
        let _ = (input_latency, output_latency);
    }

    /// A new block is ready: input buffers hold fresh samples and output
    /// buffers must be filled before the method returns. Every channel in
    /// `active` already points at the buffer slot for this block.
    fn buffer_switch(
        &self,
        sample_time_ns: i64,
        sample_position: i64,
        active: &HashSet<Arc<Channel>>,
    );
}

type ListenerList = Arc<Vec<Arc<dyn AsioDriverListener>>>;

/// State shared under the coarse control lock.
struct ControlState {
    state: DriverState,
    registry: Option<ChannelRegistry>,
    listeners: ListenerList,
    block_frames: u32,
}

struct DriverInner {
    backend: Arc<dyn NativeDriver>,
    options: HostOptions,
    info: OnceCell<DriverInfo>,
    control: Mutex<ControlState>,
    registered_threads: Mutex<HashSet<ThreadId>>,
    reset_tx: Sender<()>,
}

/// Host-side handle to a loaded ASIO-style driver.
///
/// A fresh handle is in the `LOADED` state; drive it with
/// [`initialize`](AsioDriver::initialize),
/// [`create_buffers`](AsioDriver::create_buffers) and
/// [`start`](AsioDriver::start). Every operation checks the lifecycle state
/// first and fails with [`AsioError::InvalidState`] out of order. Dropping
/// the handle returns the driver to `LOADED`.
pub struct AsioDriver {
    inner: Arc<DriverInner>,
}

impl AsioDriver {
    /// Wrap a loaded native driver. The handle starts in `LOADED`.
    pub fn attach(backend: Arc<dyn NativeDriver>) -> AsioDriver {
        AsioDriver::attach_with_options(backend, HostOptions::default())
    }

    /// Wrap a loaded native driver with explicit host options.
    pub fn attach_with_options(backend: Arc<dyn NativeDriver>, options: HostOptions) -> AsioDriver {
        let (reset_tx, reset_rx) = crossbeam_channel::unbounded();
        let inner = Arc::new(DriverInner {
            backend,
            options,
            info: OnceCell::new(),
            control: Mutex::new(ControlState {
                state: DriverState::Loaded,
                registry: None,
                listeners: Arc::new(Vec::new()),
                block_frames: 0,
            }),
            registered_threads: Mutex::new(HashSet::new()),
            reset_tx,
        });
        spawn_reset_worker(reset_rx, Arc::downgrade(&inner));
        AsioDriver { inner }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        self.inner.control.lock().state
    }

    /// Identity of the driver, available once `initialize` has succeeded.
    pub fn driver_info(&self) -> Option<&DriverInfo> {
        self.inner.info.get()
    }

    /// The driver's name, once initialised.
    pub fn driver_name(&self) -> Option<&str> {
        self.driver_info().map(|info| info.driver_name.as_str())
    }

    /// The driver's version, once initialised.
    pub fn driver_version(&self) -> Option<i32> {
        self.driver_info().map(|info| info.driver_version)
    }

    /// The ASIO protocol version the driver speaks, once initialised.
    pub fn asio_version(&self) -> Option<i32> {
        self.driver_info().map(|info| info.asio_version)
    }

    /// Initialise the driver: `LOADED` → `INITIALIZED`. Enumerates the
    /// hardware channels on first initialisation; channel identities then
    /// persist for the life of the handle.
    pub fn initialize(&self) -> Result<DriverInfo, AsioError> {
        self.inner.initialize()
    }

    /// Shut the driver down: `INITIALIZED` → `LOADED`.
    pub fn shutdown(&self) -> Result<(), AsioError> {
        self.inner.shutdown()
    }

    /// Create buffers for the requested channels: `INITIALIZED` →
    /// `PREPARED`. The set must be non-empty and contain only channels of
    /// this driver; it is copied, so later mutation by the caller has no
    /// effect. The block size is the driver's preferred size unless
    /// [`HostOptions::block_frames`] overrides it.
    pub fn create_buffers(&self, channels: &HashSet<Arc<Channel>>) -> Result<(), AsioError> {
        self.inner.create_buffers(channels)
    }

    /// Release all channel buffers: `PREPARED` → `INITIALIZED`.
    pub fn dispose_buffers(&self) -> Result<(), AsioError> {
        self.inner.dispose_buffers()
    }

    /// Start streaming: `PREPARED` → `RUNNING`. `buffer_switch` callbacks
    /// begin arriving on the native engine's thread.
    pub fn start(&self) -> Result<(), AsioError> {
        self.inner.start()
    }

    /// Stop streaming: `RUNNING` → `PREPARED`.
    pub fn stop(&self) -> Result<(), AsioError> {
        self.inner.stop()
    }

    /// Walk the state machine down to `target`, invoking each teardown
    /// operation along the way (`stop`, `dispose_buffers`, `shutdown`). A
    /// no-op when `target` is at or above the current state, which also
    /// makes it idempotent.
    pub fn return_to_state(&self, target: DriverState) -> Result<(), AsioError> {
        self.inner.return_to_state(target)
    }

    /// Register a listener. Permitted only below `PREPARED`; registering
    /// the same `Arc` twice keeps a single entry. Listeners are notified in
    /// registration order.
    pub fn add_listener(&self, listener: Arc<dyn AsioDriverListener>) -> Result<(), AsioError> {
        let mut ctl = self.inner.control.lock();
        if ctl.state.at_least(DriverState::Prepared) {
            return Err(AsioError::ListenersLocked { current: ctl.state });
        }
        if ctl
            .listeners
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &listener))
        {
            return Ok(());
        }
        let mut listeners = ctl.listeners.as_ref().clone();
        listeners.push(listener);
        ctl.listeners = Arc::new(listeners);
        Ok(())
    }

    /// Unregister a listener. Permitted only below `PREPARED`.
    pub fn remove_listener(&self, listener: &Arc<dyn AsioDriverListener>) -> Result<(), AsioError> {
        let mut ctl = self.inner.control.lock();
        if ctl.state.at_least(DriverState::Prepared) {
            return Err(AsioError::ListenersLocked { current: ctl.state });
        }
        let listeners: Vec<_> = ctl
            .listeners
            .iter()
            .filter(|existing| !Arc::ptr_eq(existing, listener))
            .cloned()
            .collect();
        ctl.listeners = Arc::new(listeners);
        Ok(())
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.control.lock().listeners.len()
    }

    /// The callback handle the native glue invokes. Cheap to clone; becomes
    /// inert once the driver is dropped.
    pub fn callbacks(&self) -> DriverCallbacks {
        DriverCallbacks {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of hardware input channels.
    pub fn input_channel_count(&self) -> Result<u32, AsioError> {
        self.inner.channel_count(Direction::Input)
    }

    /// Number of hardware output channels.
    pub fn output_channel_count(&self) -> Result<u32, AsioError> {
        self.inner.channel_count(Direction::Output)
    }

    /// The input channel at `index`.
    pub fn input_channel(&self, index: u32) -> Result<Arc<Channel>, AsioError> {
        self.inner.channel(index, Direction::Input)
    }

    /// The output channel at `index`.
    pub fn output_channel(&self, index: u32) -> Result<Arc<Channel>, AsioError> {
        self.inner.channel(index, Direction::Output)
    }

    /// The channels currently holding buffers. Empty below `PREPARED`.
    pub fn active_channels(&self) -> Arc<HashSet<Arc<Channel>>> {
        let ctl = self.inner.control.lock();
        match &ctl.registry {
            Some(registry) => registry.active(),
            None => Arc::new(HashSet::new()),
        }
    }

    /// The hardware sample rate in Hertz.
    pub fn sample_rate(&self) -> Result<f64, AsioError> {
        self.inner
            .query("sample_rate", |backend| backend.sample_rate())
    }

    /// Whether the hardware supports `sample_rate`.
    pub fn can_sample_rate(&self, sample_rate: f64) -> Result<bool, AsioError> {
        self.inner
            .query("can_sample_rate", |backend| backend.can_sample_rate(sample_rate))
    }

    /// Switch the hardware to `sample_rate`.
    pub fn set_sample_rate(&self, sample_rate: f64) -> Result<(), AsioError> {
        self.inner
            .query("set_sample_rate", |backend| backend.set_sample_rate(sample_rate))
    }

    /// The driver's block size constraints.
    pub fn buffer_size_bounds(&self) -> Result<BufferSizeBounds, AsioError> {
        self.inner
            .query("buffer_size_bounds", |backend| backend.buffer_size_bounds())
    }

    /// Input/output latencies in samples. Meaningful once buffers exist;
    /// before `PREPARED` drivers assume their preferred block size.
    pub fn latencies(&self) -> Result<Latencies, AsioError> {
        self.inner.query("latencies", |backend| backend.latencies())
    }

    /// Open the driver's own settings panel.
    pub fn open_control_panel(&self) -> Result<(), AsioError> {
        self.inner
            .query("open_control_panel", |backend| backend.open_control_panel())
    }

    /// The negotiated block size in frames. Requires at least `PREPARED`.
    pub fn block_frames(&self) -> Result<u32, AsioError> {
        let ctl = self.inner.control.lock();
        require_at_least(&ctl, "block_frames", DriverState::Prepared)?;
        Ok(ctl.block_frames)
    }
}

impl Drop for AsioDriver {
    fn drop(&mut self) {
        if let Err(err) = self.inner.return_to_state(DriverState::Loaded) {
            warn!(error = %err, "teardown on drop failed");
        }
    }
}

fn require_at_least(
    ctl: &ControlState,
    operation: &'static str,
    minimum: DriverState,
) -> Result<(), AsioError> {
    if ctl.state.at_least(minimum) {
        Ok(())
    } else {
        Err(AsioError::InvalidState {
            operation,
            current: ctl.state,
            required: minimum,
        })
    }
}

fn require_exactly(
    ctl: &ControlState,
    operation: &'static str,
    required: DriverState,
) -> Result<(), AsioError> {
    if ctl.state == required {
        Ok(())
    } else {
        Err(AsioError::InvalidState {
            operation,
            current: ctl.state,
            required,
        })
    }
}

fn validate_block_size(requested: u32, bounds: BufferSizeBounds) -> Result<(), AsioError> {
    let out_of_bounds = AsioError::BlockSizeOutOfBounds {
        requested,
        min: bounds.min,
        max: bounds.max,
        granularity: bounds.granularity,
    };
    if requested < bounds.min || requested > bounds.max {
        return Err(out_of_bounds);
    }
    match bounds.granularity {
        // Powers of two only.
        -1 => {
            if !requested.is_power_of_two() {
                return Err(out_of_bounds);
            }
        }
        // Only the preferred size is valid.
        0 => {
            if requested != bounds.preferred {
                return Err(out_of_bounds);
            }
        }
        granularity => {
            if (requested - bounds.min) % granularity as u32 != 0 {
                return Err(out_of_bounds);
            }
        }
    }
    Ok(())
}

impl DriverInner {
    /// Register the calling OS thread with the native layer, once per
    /// thread. Any thread may be the first to reach the native boundary,
    /// including the engine's real-time thread, so every entry point calls
    /// this before touching the backend.
    fn ensure_thread_registered(&self) -> Result<(), AsioError> {
        let id = thread::current().id();
        let mut registered = self.registered_threads.lock();
        if registered.contains(&id) {
            return Ok(());
        }
        self.backend.register_calling_thread()?;
        registered.insert(id);
        Ok(())
    }

    fn query<T>(
        &self,
        operation: &'static str,
        call: impl FnOnce(&dyn NativeDriver) -> Result<T, AsioError>,
    ) -> Result<T, AsioError> {
        self.ensure_thread_registered()?;
        let ctl = self.control.lock();
        require_at_least(&ctl, operation, DriverState::Initialized)?;
        call(self.backend.as_ref())
    }

    fn channel_count(&self, direction: Direction) -> Result<u32, AsioError> {
        let ctl = self.control.lock();
        require_at_least(&ctl, "channel_count", DriverState::Initialized)?;
        match &ctl.registry {
            Some(registry) => Ok(registry.count(direction)),
            None => Ok(0),
        }
    }

    fn channel(&self, index: u32, direction: Direction) -> Result<Arc<Channel>, AsioError> {
        let ctl = self.control.lock();
        require_at_least(&ctl, "channel", DriverState::Initialized)?;
        match &ctl.registry {
            Some(registry) => registry.channel(index, direction),
            None => Err(AsioError::ChannelOutOfRange {
                direction,
                index,
                count: 0,
            }),
        }
    }

    fn initialize(&self) -> Result<DriverInfo, AsioError> {
        self.ensure_thread_registered()?;
        let mut ctl = self.control.lock();
        require_exactly(&ctl, "initialize", DriverState::Loaded)?;
        let info = self.backend.init()?;
        if ctl.registry.is_none() {
            match ChannelRegistry::enumerate(self.backend.as_ref()) {
                Ok(registry) => ctl.registry = Some(registry),
                Err(err) => {
                    self.backend.exit();
                    return Err(err);
                }
            }
        }
        let info = self.info.get_or_init(|| info).clone();
        ctl.state = DriverState::Initialized;
        info!(driver = %info.driver_name, version = info.driver_version, "driver initialised");
        Ok(info)
    }

    fn shutdown(&self) -> Result<(), AsioError> {
        self.ensure_thread_registered()?;
        let mut ctl = self.control.lock();
        require_exactly(&ctl, "shutdown", DriverState::Initialized)?;
        self.backend.exit();
        ctl.state = DriverState::Loaded;
        info!("driver shut down");
        Ok(())
    }

    fn create_buffers(&self, channels: &HashSet<Arc<Channel>>) -> Result<(), AsioError> {
        self.ensure_thread_registered()?;
        let mut ctl = self.control.lock();
        require_exactly(&ctl, "create_buffers", DriverState::Initialized)?;
        let bounds = self.backend.buffer_size_bounds()?;
        let block_frames = self.options.block_frames.unwrap_or(bounds.preferred);
        if self.options.enforce_buffer_size_bounds {
            validate_block_size(block_frames, bounds)?;
        }
        let Some(registry) = ctl.registry.as_mut() else {
            return Err(AsioError::Driver("channel registry missing".into()));
        };
        let pairs = registry.validate(channels)?;
        self.backend.create_buffers(&pairs, block_frames)?;
        registry.activate(channels, block_frames);
        ctl.block_frames = block_frames;
        ctl.state = DriverState::Prepared;
        info!(channels = pairs.len(), block_frames, "buffers created");
        Ok(())
    }

    fn dispose_buffers(&self) -> Result<(), AsioError> {
        self.ensure_thread_registered()?;
        let mut ctl = self.control.lock();
        require_exactly(&ctl, "dispose_buffers", DriverState::Prepared)?;
        if let Some(registry) = ctl.registry.as_mut() {
            registry.deactivate();
        }
        // Host-side buffers are gone either way; leave INITIALIZED even if
        // the native release call fails, and surface the failure.
        let result = self.backend.dispose_buffers();
        ctl.block_frames = 0;
        ctl.state = DriverState::Initialized;
        info!("buffers disposed");
        result
    }

    fn start(&self) -> Result<(), AsioError> {
        self.ensure_thread_registered()?;
        let mut ctl = self.control.lock();
        require_exactly(&ctl, "start", DriverState::Prepared)?;
        self.backend.start()?;
        ctl.state = DriverState::Running;
        info!("driver started");
        Ok(())
    }

    fn stop(&self) -> Result<(), AsioError> {
        self.ensure_thread_registered()?;
        let mut ctl = self.control.lock();
        require_exactly(&ctl, "stop", DriverState::Running)?;
        self.backend.stop()?;
        ctl.state = DriverState::Prepared;
        info!("driver stopped");
        Ok(())
    }

    fn return_to_state(&self, target: DriverState) -> Result<(), AsioError> {
        loop {
            let current = self.control.lock().state;
            if target >= current {
                return Ok(());
            }
            match current {
                DriverState::Running => self.stop()?,
                DriverState::Prepared => self.dispose_buffers()?,
                DriverState::Initialized => self.shutdown()?,
                // LOADED is the lowest state this handle can reach; the
                // load/unload step belongs to the collaborator that
                // produced the backend.
                DriverState::Loaded | DriverState::Unloaded => return Ok(()),
            }
        }
    }

    fn listeners(&self) -> ListenerList {
        Arc::clone(&self.control.lock().listeners)
    }
}

/// Entry points for native-originated notifications.
///
/// The glue layer binding a concrete driver (or [`SimDriver`](crate::sim::SimDriver))
/// calls these from whatever thread the native engine uses. All methods are
/// infallible from the caller's perspective; a handle whose driver has been
/// dropped logs and ignores the event.
#[derive(Clone)]
pub struct DriverCallbacks {
    inner: Weak<DriverInner>,
}

impl DriverCallbacks {
    fn upgrade(&self, event: &'static str) -> Option<Arc<DriverInner>> {
        match self.inner.upgrade() {
            Some(inner) => Some(inner),
            None => {
                warn!(event, "callback after driver drop");
                None
            }
        }
    }

    /// A new block is ready. Switches every active channel to `slot`
    /// (rewinding its cursor), then notifies listeners in registration
    /// order, so listener code always observes the new slot. Real-time
    /// safe: two `Arc` clones under a brief lock hold, no allocation.
    pub fn buffer_switch(&self, sample_time_ns: i64, sample_position: i64, slot: BufferSlot) {
        let Some(inner) = self.upgrade("buffer_switch") else {
            return;
        };
        if let Err(err) = inner.ensure_thread_registered() {
            warn!(error = %err, "real-time thread registration failed");
            return;
        }
        let (active, listeners) = {
            let ctl = inner.control.lock();
            if ctl.state != DriverState::Running {
                debug!(state = %ctl.state, "buffer_switch ignored outside RUNNING");
                return;
            }
            let Some(registry) = ctl.registry.as_ref() else {
                return;
            };
            (registry.active(), Arc::clone(&ctl.listeners))
        };
        for channel in active.iter() {
            channel.set_buffer_slot(slot);
        }
        debug!(slot = slot.index(), position = sample_position, "buffer_switch");
        for listener in listeners.iter() {
            listener.buffer_switch(sample_time_ns, sample_position, &active);
        }
    }

    /// The hardware sample rate changed.
    pub fn sample_rate_did_change(&self, sample_rate: f64) {
        let Some(inner) = self.upgrade("sample_rate_did_change") else {
            return;
        };
        for listener in inner.listeners().iter() {
            listener.sample_rate_did_change(sample_rate);
        }
    }

    /// The driver requests a full reset. Listeners are notified, then the
    /// teardown to `INITIALIZED` is handed to the reset worker thread; it
    /// runs once the calling thread has left the dispatch path and released
    /// the control lock. Never tears down synchronously: the caller may be
    /// the real-time thread, inside the very lock teardown needs.
    pub fn reset_request(&self) {
        let Some(inner) = self.upgrade("reset_request") else {
            return;
        };
        for listener in inner.listeners().iter() {
            listener.reset_request();
        }
        if inner.reset_tx.send(()).is_err() {
            warn!("reset worker unavailable");
        }
    }

    /// The driver detected underruns or overruns.
    pub fn resync_request(&self) {
        let Some(inner) = self.upgrade("resync_request") else {
            return;
        };
        for listener in inner.listeners().iter() {
            listener.resync_request();
        }
    }

    /// The driver has a new preferred block size.
    pub fn buffer_size_changed(&self, block_frames: u32) {
        let Some(inner) = self.upgrade("buffer_size_changed") else {
            return;
        };
        for listener in inner.listeners().iter() {
            listener.buffer_size_changed(block_frames);
        }
    }

    /// Input or output latencies changed.
    pub fn latencies_changed(&self, input_latency: u32, output_latency: u32) {
        let Some(inner) = self.upgrade("latencies_changed") else {
            return;
        };
        for listener in inner.listeners().iter() {
            listener.latencies_changed(input_latency, output_latency);
        }
    }
}

/// The deferred execution context for `reset_request`. Lives as long as the
/// driver; exits when the sender side is dropped.
fn spawn_reset_worker(rx: Receiver<()>, inner: Weak<DriverInner>) {
    let builder = thread::Builder::new().name("asio-reset".into());
    let spawned = builder.spawn(move || {
        while rx.recv().is_ok() {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            info!("deferred reset: returning driver to INITIALIZED");
            if let Err(err) = inner.return_to_state(DriverState::Initialized) {
                warn!(error = %err, "deferred reset failed");
            }
        }
    });
    if let Err(err) = spawned {
        warn!(error = %err, "failed to spawn reset worker");
    }
}
