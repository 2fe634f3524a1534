#![deny(missing_docs)]

//! Host-side abstraction over a native ASIO-style audio driver.
//!
//! [`AsioDriver`] owns the lifecycle state machine (`LOADED` →
//! `INITIALIZED` → `PREPARED` → `RUNNING`), the per-channel double-buffered
//! sample memory, and the dispatch of real-time and control-plane callbacks
//! from the native engine into registered [`AsioDriverListener`]s. Sample
//! data crosses the API boundary as normalized `f32` in `[-1, 1]`; the
//! [`format`] codec translates to and from each channel's native encoding.
//!
//! The native driver itself is abstracted behind the
//! [`NativeDriver`](backend::NativeDriver) trait; [`sim::SimDriver`]
//! provides an in-process implementation for tests and diagnostics.

use std::sync::Once;

pub mod backend;
pub mod channel;
pub mod driver;
pub mod format;
pub mod sim;
pub mod state;

pub use backend::{BufferSizeBounds, ChannelDescriptor, Latencies, NativeDriver};
pub use channel::{BufferSlot, Channel, Direction};
pub use driver::{AsioDriver, AsioDriverListener, DriverCallbacks};
pub use format::{Endianness, SampleDomain, SampleType};
pub use state::DriverState;

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` fmt subscriber once. Safe to call from any
/// thread, any number of times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

/// Error enumeration surfaced across the public API.
#[derive(thiserror::Error, Debug)]
pub enum AsioError {
    /// An operation was invoked while the state machine was not in a state
    /// permitting it. A caller bug; correct the call order rather than
    /// retrying.
    #[error("{operation} requires driver state {required}, current state is {current}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// State the driver was in.
        current: DriverState,
        /// State the operation requires (exactly, or at minimum).
        required: DriverState,
    },
    /// Listener registration or removal attempted at `PREPARED` or above.
    #[error("listeners can only be modified in the LOADED or INITIALIZED states, current state is {current}")]
    ListenersLocked {
        /// State the driver was in.
        current: DriverState,
    },
    /// `create_buffers` was given an empty channel set.
    #[error("the set of channels to activate may not be empty")]
    EmptyChannelSet,
    /// `create_buffers` was given a channel not owned by this driver.
    #[error("channel '{0}' does not belong to this driver")]
    ForeignChannel(String),
    /// A channel index outside the range the driver reported.
    #[error("{direction} channel index must be in [0,{count}): {index}")]
    ChannelOutOfRange {
        /// Direction that was queried.
        direction: Direction,
        /// The offending index.
        index: u32,
        /// Number of channels available in that direction.
        count: u32,
    },
    /// Encode or decode attempted on a DSD sample type.
    #[error("sample type {0:?} is not supported by the float codec")]
    UnsupportedSampleType(SampleType),
    /// A bulk read or write larger than the space left in the block buffer.
    #[error("buffer overflow: {requested} samples requested, {available} remaining in block")]
    BufferOverflow {
        /// Samples the caller asked for.
        requested: usize,
        /// Samples left between the cursor and the end of the buffer.
        available: usize,
    },
    /// Read attempted on an output channel.
    #[error("only input channels can be read from: {0}")]
    NotAnInputChannel(String),
    /// Write attempted on an input channel.
    #[error("only output channels can be written to: {0}")]
    NotAnOutputChannel(String),
    /// Buffer access on a channel with no allocated buffers.
    #[error("channel is not active: {0}")]
    InactiveChannel(String),
    /// A requested block size fell outside the driver's reported bounds.
    #[error("block size {requested} violates driver bounds (min {min}, max {max}, granularity {granularity})")]
    BlockSizeOutOfBounds {
        /// Requested block size in frames.
        requested: u32,
        /// Driver minimum.
        min: u32,
        /// Driver maximum.
        max: u32,
        /// Driver granularity; `-1` means power-of-two steps.
        granularity: i32,
    },
    /// The native layer refused an operation. Fatal for the session; the
    /// sanctioned recovery is `return_to_state(Loaded)` and a fresh
    /// `initialize`.
    #[error("native driver failure: {0}")]
    Driver(String),
}

/// Name and version information returned by the native initialisation call.
/// Produced once per driver; read-only thereafter.
#[derive(Clone, Debug)]
pub struct DriverInfo {
    /// ASIO protocol version the driver speaks (1 or 2).
    pub asio_version: i32,
    /// Version of the driver itself.
    pub driver_version: i32,
    /// Human-readable driver name.
    pub driver_name: String,
    /// Driver-supplied error text from initialisation, if any.
    pub error_message: String,
}

impl std::fmt::Display for DriverInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== ASIO Driver Information ===")?;
        writeln!(f, "ASIO Version: {}", self.asio_version)?;
        writeln!(f, "Driver Version: {}", self.driver_version)?;
        writeln!(f, "Driver Name: {}", self.driver_name)?;
        write!(f, "Error Message: {}", self.error_message)
    }
}

/// Host-side tunables applied when buffers are negotiated.
#[derive(Clone, Copy, Debug)]
pub struct HostOptions {
    /// Block size to request instead of the driver's preferred size.
    pub block_frames: Option<u32>,
    /// Validate a block-size override against the driver's reported
    /// min/max/granularity. Off by default; drivers in the wild report
    /// bounds that their own preferred size violates.
    pub enforce_buffer_size_bounds: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            block_frames: None,
            enforce_buffer_size_bounds: false,
        }
    }
}
