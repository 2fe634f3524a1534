//! The boundary toward the native driver.
//!
//! Everything the host needs from a concrete driver is expressed through
//! [`NativeDriver`]. How the driver is discovered, loaded, or bound to the
//! process is out of scope; implementations wrap whatever binding exists
//! ([`SimDriver`](crate::sim::SimDriver) wraps nothing at all).

use crate::channel::Direction;
use crate::format::SampleType;
use crate::{AsioError, DriverInfo};

/// Static identity and format of one hardware channel, as reported by the
/// native driver during channel enumeration.
#[derive(Clone, Debug)]
pub struct ChannelDescriptor {
    /// Channel index, unique per direction.
    pub index: u32,
    /// Hardware channel group the channel belongs to.
    pub channel_group: i32,
    /// Native sample encoding for the channel's buffers.
    pub sample_type: SampleType,
    /// Driver-assigned channel name.
    pub name: String,
}

/// Buffer size constraints reported by the native driver, in frames.
#[derive(Clone, Copy, Debug)]
pub struct BufferSizeBounds {
    /// Smallest supported block size.
    pub min: u32,
    /// Largest supported block size.
    pub max: u32,
    /// The size the driver prefers; hosts should use it.
    pub preferred: u32,
    /// Step between valid sizes; `-1` means powers of two only, `0` means
    /// only `preferred` is valid.
    pub granularity: i32,
}

/// Input and output latencies in samples. Only meaningful once buffers have
/// been created; before that the driver assumes its preferred block size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Latencies {
    /// Input latency in samples.
    pub input: u32,
    /// Output latency in samples.
    pub output: u32,
}

/// Operations a loaded native driver must provide to the host.
///
/// All methods are called with the host's control lock held, so
/// implementations never see overlapping lifecycle calls. Callbacks flow
/// the other way through [`DriverCallbacks`](crate::DriverCallbacks), which
/// the glue code obtains from [`AsioDriver::callbacks`](crate::AsioDriver::callbacks).
pub trait NativeDriver: Send + Sync {
    /// Initialise the driver and return its identity. Failure is fatal for
    /// the session.
    fn init(&self) -> Result<DriverInfo, AsioError>;

    /// Shut the driver down, undoing `init`.
    fn exit(&self);

    /// Open the driver's own settings panel, if it has one.
    fn open_control_panel(&self) -> Result<(), AsioError>;

    /// Number of hardware channels in the given direction.
    fn channel_count(&self, direction: Direction) -> Result<u32, AsioError>;

    /// Identity and format of the channel at `index` in `direction`.
    fn channel_descriptor(
        &self,
        index: u32,
        direction: Direction,
    ) -> Result<ChannelDescriptor, AsioError>;

    /// The sample rate the hardware is currently set to, in Hertz.
    fn sample_rate(&self) -> Result<f64, AsioError>;

    /// Whether the hardware supports the given sample rate.
    fn can_sample_rate(&self, sample_rate: f64) -> Result<bool, AsioError>;

    /// Switch the hardware to the given sample rate.
    fn set_sample_rate(&self, sample_rate: f64) -> Result<(), AsioError>;

    /// The driver's block size constraints.
    fn buffer_size_bounds(&self) -> Result<BufferSizeBounds, AsioError>;

    /// Current input/output latencies in samples.
    fn latencies(&self) -> Result<Latencies, AsioError>;

    /// Allocate hardware-side buffers for the given `(index, direction)`
    /// pairs at the given block size.
    fn create_buffers(
        &self,
        channels: &[(u32, Direction)],
        block_frames: u32,
    ) -> Result<(), AsioError>;

    /// Release the buffers created by `create_buffers`.
    fn dispose_buffers(&self) -> Result<(), AsioError>;

    /// Start the hardware streaming; `buffer_switch` callbacks follow.
    fn start(&self) -> Result<(), AsioError>;

    /// Stop the hardware streaming.
    fn stop(&self) -> Result<(), AsioError>;

    /// Register the calling OS thread with the native layer.
    ///
    /// Required on platforms whose drivers live in an apartment-threaded
    /// component model. The host calls this at most once per thread before
    /// that thread's first native call. The default is a no-op for drivers
    /// without a threading-model requirement.
    fn register_calling_thread(&self) -> Result<(), AsioError> {
        Ok(())
    }
}
