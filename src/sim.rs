//! An in-process simulated native driver.
//!
//! [`SimDriver`] implements [`NativeDriver`] without touching any hardware,
//! so the full host stack can be exercised in tests and from the `asioctl`
//! self-test. Its [`pump_block`](SimDriver::pump_block) stands in for the
//! native engine's real-time thread: it presents a deterministic ramp on
//! every active input channel, fires `buffer_switch`, then captures what
//! listeners wrote to the outputs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{BufferSizeBounds, ChannelDescriptor, Latencies, NativeDriver};
use crate::channel::{BufferSlot, Channel, Direction};
use crate::driver::{AsioDriver, DriverCallbacks};
use crate::format::{self, SampleType};
use crate::{AsioError, DriverInfo};

/// Shape of the simulated hardware.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Name reported by `init`.
    pub driver_name: String,
    /// Driver version reported by `init`.
    pub driver_version: i32,
    /// Sample type of each input channel, one entry per channel.
    pub inputs: Vec<SampleType>,
    /// Sample type of each output channel, one entry per channel.
    pub outputs: Vec<SampleType>,
    /// Sample rates the simulated hardware accepts.
    pub supported_rates: Vec<f64>,
    /// Rate the hardware starts at.
    pub initial_rate: f64,
    /// Block size constraints reported to the host.
    pub bounds: BufferSizeBounds,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            driver_name: "Simulated ASIO Driver".into(),
            driver_version: 1,
            inputs: vec![SampleType::Int32Lsb; 2],
            outputs: vec![SampleType::Int32Lsb; 2],
            supported_rates: vec![44100.0, 48000.0, 88200.0, 96000.0],
            initial_rate: 44100.0,
            bounds: BufferSizeBounds {
                min: 32,
                max: 2048,
                preferred: 256,
                granularity: -1,
            },
        }
    }
}

struct SimState {
    initialized: bool,
    running: bool,
    buffers: Vec<(u32, Direction)>,
    block_frames: u32,
    sample_rate: f64,
    sample_position: i64,
    next_slot: BufferSlot,
    init_calls: u32,
    exit_calls: u32,
    thread_registrations: u32,
    control_panel_opens: u32,
    captured: HashMap<u32, Vec<f32>>,
}

/// A fake native driver with inspectable internals.
pub struct SimDriver {
    config: SimConfig,
    state: Mutex<SimState>,
}

impl SimDriver {
    /// A driver with the default two-in, two-out `Int32Lsb` layout.
    pub fn new() -> Arc<SimDriver> {
        SimDriver::with_config(SimConfig::default())
    }

    /// A driver shaped by `config`.
    pub fn with_config(config: SimConfig) -> Arc<SimDriver> {
        let initial_rate = config.initial_rate;
        Arc::new(SimDriver {
            config,
            state: Mutex::new(SimState {
                initialized: false,
                running: false,
                buffers: Vec::new(),
                block_frames: 0,
                sample_rate: initial_rate,
                sample_position: 0,
                next_slot: BufferSlot::A,
                init_calls: 0,
                exit_calls: 0,
                thread_registrations: 0,
                control_panel_opens: 0,
                captured: HashMap::new(),
            }),
        })
    }

    /// Run one simulated block: fill every active input channel with a
    /// deterministic ramp, fire `buffer_switch` for the next slot, then
    /// capture the decoded contents of every active output channel. Slots
    /// alternate strictly, starting at [`BufferSlot::A`].
    ///
    /// Returns the slot that was presented.
    pub fn pump_block(
        &self,
        driver: &AsioDriver,
        callbacks: &DriverCallbacks,
    ) -> Result<BufferSlot, AsioError> {
        let (slot, block_frames, sample_position, sample_rate) = {
            let state = self.state.lock();
            (
                state.next_slot,
                state.block_frames,
                state.sample_position,
                state.sample_rate,
            )
        };

        let active = driver.active_channels();
        for channel in active.iter().filter(|c| c.direction() == Direction::Input) {
            self.present_input(channel, slot, block_frames, sample_position)?;
        }

        let sample_time_ns = (sample_position as f64 / sample_rate * 1e9) as i64;
        callbacks.buffer_switch(sample_time_ns, sample_position, slot);

        let mut state = self.state.lock();
        for channel in active.iter().filter(|c| c.direction() == Direction::Output) {
            let bytes = channel.slot_bytes(slot);
            let width = channel.sample_type().byte_width();
            let sink = state.captured.entry(channel.index()).or_default();
            for frame in bytes.chunks_exact(width) {
                sink.push(format::decode_sample(channel.sample_type(), frame)?);
            }
        }
        state.next_slot = slot.other();
        state.sample_position += block_frames as i64;
        debug!(slot = slot.index(), sample_position, "simulated block pumped");
        Ok(slot)
    }

    fn present_input(
        &self,
        channel: &Arc<Channel>,
        slot: BufferSlot,
        block_frames: u32,
        sample_position: i64,
    ) -> Result<(), AsioError> {
        let ty = channel.sample_type();
        let width = ty.byte_width();
        let mut bytes = vec![0u8; block_frames as usize * width];
        for frame in 0..block_frames as usize {
            let value = ramp(sample_position + frame as i64);
            let offset = frame * width;
            format::encode_sample(ty, value, &mut bytes[offset..offset + width])?;
        }
        channel.fill_slot(slot, &bytes);
        Ok(())
    }

    /// Everything listeners have written to the output channel at `index`,
    /// decoded to normalized samples, across all pumped blocks.
    pub fn captured_output(&self, index: u32) -> Vec<f32> {
        self.state
            .lock()
            .captured
            .get(&index)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `init` calls so far.
    pub fn init_calls(&self) -> u32 {
        self.state.lock().init_calls
    }

    /// Number of `exit` calls so far.
    pub fn exit_calls(&self) -> u32 {
        self.state.lock().exit_calls
    }

    /// Number of `register_calling_thread` calls so far.
    pub fn thread_registrations(&self) -> u32 {
        self.state.lock().thread_registrations
    }

    /// Number of `open_control_panel` calls so far.
    pub fn control_panel_opens(&self) -> u32 {
        self.state.lock().control_panel_opens
    }

    /// Whether `create_buffers` has run without a matching
    /// `dispose_buffers`.
    pub fn has_buffers(&self) -> bool {
        !self.state.lock().buffers.is_empty()
    }

    /// Whether the simulated engine is streaming.
    pub fn is_streaming(&self) -> bool {
        self.state.lock().running
    }

    fn sample_types(&self, direction: Direction) -> &[SampleType] {
        match direction {
            Direction::Input => &self.config.inputs,
            Direction::Output => &self.config.outputs,
        }
    }
}

/// Deterministic input signal: a sawtooth over 1000 frames in `[0, 1)`.
fn ramp(frame: i64) -> f32 {
    (frame.rem_euclid(1000)) as f32 / 1000.0
}

impl NativeDriver for SimDriver {
    fn init(&self) -> Result<DriverInfo, AsioError> {
        let mut state = self.state.lock();
        state.init_calls += 1;
        state.initialized = true;
        Ok(DriverInfo {
            asio_version: 2,
            driver_version: self.config.driver_version,
            driver_name: self.config.driver_name.clone(),
            error_message: String::new(),
        })
    }

    fn exit(&self) {
        let mut state = self.state.lock();
        state.exit_calls += 1;
        state.initialized = false;
    }

    fn open_control_panel(&self) -> Result<(), AsioError> {
        self.state.lock().control_panel_opens += 1;
        Ok(())
    }

    fn channel_count(&self, direction: Direction) -> Result<u32, AsioError> {
        Ok(self.sample_types(direction).len() as u32)
    }

    fn channel_descriptor(
        &self,
        index: u32,
        direction: Direction,
    ) -> Result<ChannelDescriptor, AsioError> {
        let types = self.sample_types(direction);
        let Some(&sample_type) = types.get(index as usize) else {
            return Err(AsioError::ChannelOutOfRange {
                direction,
                index,
                count: types.len() as u32,
            });
        };
        let side = match direction {
            Direction::Input => "In",
            Direction::Output => "Out",
        };
        Ok(ChannelDescriptor {
            index,
            channel_group: 0,
            sample_type,
            name: format!("Sim {side} {index}"),
        })
    }

    fn sample_rate(&self) -> Result<f64, AsioError> {
        Ok(self.state.lock().sample_rate)
    }

    fn can_sample_rate(&self, sample_rate: f64) -> Result<bool, AsioError> {
        Ok(self.config.supported_rates.contains(&sample_rate))
    }

    fn set_sample_rate(&self, sample_rate: f64) -> Result<(), AsioError> {
        if !self.config.supported_rates.contains(&sample_rate) {
            return Err(AsioError::Driver(format!(
                "sample rate {sample_rate} Hz not supported"
            )));
        }
        self.state.lock().sample_rate = sample_rate;
        Ok(())
    }

    fn buffer_size_bounds(&self) -> Result<BufferSizeBounds, AsioError> {
        Ok(self.config.bounds)
    }

    fn latencies(&self) -> Result<Latencies, AsioError> {
        let state = self.state.lock();
        let block = if state.block_frames > 0 {
            state.block_frames
        } else {
            self.config.bounds.preferred
        };
        Ok(Latencies {
            input: block,
            output: 2 * block,
        })
    }

    fn create_buffers(
        &self,
        channels: &[(u32, Direction)],
        block_frames: u32,
    ) -> Result<(), AsioError> {
        let mut state = self.state.lock();
        state.buffers = channels.to_vec();
        state.block_frames = block_frames;
        state.next_slot = BufferSlot::A;
        state.sample_position = 0;
        Ok(())
    }

    fn dispose_buffers(&self) -> Result<(), AsioError> {
        let mut state = self.state.lock();
        state.buffers.clear();
        state.block_frames = 0;
        Ok(())
    }

    fn start(&self) -> Result<(), AsioError> {
        let mut state = self.state.lock();
        if state.buffers.is_empty() {
            return Err(AsioError::Driver("start without buffers".into()));
        }
        state.running = true;
        Ok(())
    }

    fn stop(&self) -> Result<(), AsioError> {
        self.state.lock().running = false;
        Ok(())
    }

    fn register_calling_thread(&self) -> Result<(), AsioError> {
        self.state.lock().thread_registrations += 1;
        Ok(())
    }
}
