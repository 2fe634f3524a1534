//! Hardware channels and the double-buffered sample memory behind them.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::NativeDriver;
use crate::format::{self, SampleType};
use crate::AsioError;

/// Whether a channel carries audio into or out of the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Hardware input; the native engine fills the buffers.
    Input,
    /// Hardware output; the application fills the buffers.
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Which of a channel's two buffers is current for this block.
///
/// The native engine fills or drains one buffer while the application works
/// on the other; the slot alternates strictly on every `buffer_switch`
/// while the driver is running and is meaningless otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferSlot {
    /// The first buffer.
    A,
    /// The second buffer.
    B,
}

impl BufferSlot {
    /// The buffer index the native engine reports for this slot.
    pub fn index(self) -> usize {
        match self {
            BufferSlot::A => 0,
            BufferSlot::B => 1,
        }
    }

    /// Resolve a native buffer index (0 or 1).
    pub fn from_index(index: usize) -> BufferSlot {
        if index == 0 { BufferSlot::A } else { BufferSlot::B }
    }

    /// The other slot.
    pub fn other(self) -> BufferSlot {
        match self {
            BufferSlot::A => BufferSlot::B,
            BufferSlot::B => BufferSlot::A,
        }
    }
}

/// One half of a channel's double buffer: raw native-encoded bytes plus a
/// read/write cursor that rewinds on every slot switch.
struct BlockBuffer {
    bytes: Vec<u8>,
    cursor: usize,
}

/// Mutable part of a channel, shared between the control thread and the
/// real-time dispatch path. Guarded by one short-hold mutex.
struct BufferState {
    active: bool,
    slot: BufferSlot,
    buffers: [BlockBuffer; 2],
}

/// One hardware input or output line.
///
/// Identity is `(index, direction)` and only that pair participates in
/// equality and hashing, so channels can live in a `HashSet` regardless of
/// their activation state. Channels are created by the driver during
/// initialisation and handed out as `Arc<Channel>`; while active they carry
/// two raw block buffers that alternate each `buffer_switch`.
pub struct Channel {
    index: u32,
    direction: Direction,
    channel_group: i32,
    sample_type: SampleType,
    name: String,
    state: Mutex<BufferState>,
}

impl Channel {
    pub(crate) fn new(
        index: u32,
        direction: Direction,
        channel_group: i32,
        sample_type: SampleType,
        name: String,
    ) -> Arc<Channel> {
        Arc::new(Channel {
            index,
            direction,
            channel_group,
            sample_type,
            name,
            state: Mutex::new(BufferState {
                active: false,
                slot: BufferSlot::A,
                buffers: [
                    BlockBuffer {
                        bytes: Vec::new(),
                        cursor: 0,
                    },
                    BlockBuffer {
                        bytes: Vec::new(),
                        cursor: 0,
                    },
                ],
            }),
        })
    }

    /// Channel index, unique per direction.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Whether this is an input or output channel.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Hardware channel group.
    pub fn channel_group(&self) -> i32 {
        self.channel_group
    }

    /// Native sample encoding of this channel's buffers. Fixed for the
    /// channel's lifetime; it also fixes the byte order of the raw buffers.
    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    /// Driver-assigned channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the channel has allocated block buffers.
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// The buffer slot most recently reported by `buffer_switch`. Only
    /// meaningful while the driver is running.
    pub fn buffer_slot(&self) -> BufferSlot {
        self.state.lock().slot
    }

    fn identity_string(&self) -> String {
        let side = match self.direction {
            Direction::Input => "Input",
            Direction::Output => "Output",
        };
        format!("{side} Channel {}: {}", self.index, self.name)
    }

    /// Allocate the two block buffers and mark the channel active. The two
    /// steps are atomic with respect to every accessor.
    pub(crate) fn allocate(&self, block_frames: u32) {
        let bytes = block_frames as usize * self.sample_type.byte_width();
        let mut state = self.state.lock();
        for buffer in &mut state.buffers {
            buffer.bytes = vec![0u8; bytes];
            buffer.cursor = 0;
        }
        state.slot = BufferSlot::A;
        state.active = true;
    }

    /// Drop the buffer storage and mark the channel inactive.
    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        state.active = false;
        for buffer in &mut state.buffers {
            buffer.bytes = Vec::new();
            buffer.cursor = 0;
        }
    }

    /// Switch to the slot reported for the new block and rewind its cursor.
    /// Runs on the real-time thread once per block; no allocation.
    pub(crate) fn set_buffer_slot(&self, slot: BufferSlot) {
        let mut state = self.state.lock();
        state.slot = slot;
        state.buffers[slot.index()].cursor = 0;
    }

    /// Deposit raw native-encoded bytes into the given slot. Used by the
    /// native glue to present input data before a `buffer_switch`.
    pub(crate) fn fill_slot(&self, slot: BufferSlot, data: &[u8]) {
        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        let buffer = &mut state.buffers[slot.index()];
        let len = data.len().min(buffer.bytes.len());
        buffer.bytes[..len].copy_from_slice(&data[..len]);
    }

    /// Snapshot the raw bytes of the given slot. Used by the native glue to
    /// drain output data after listeners ran.
    pub(crate) fn slot_bytes(&self, slot: BufferSlot) -> Vec<u8> {
        self.state.lock().buffers[slot.index()].bytes.clone()
    }

    /// Write normalized samples to the current output buffer, converting to
    /// the channel's native encoding.
    ///
    /// The cursor advances across calls and rewinds on every slot switch.
    /// Writing more samples than the buffer has room for is a
    /// [`BufferOverflow`](AsioError::BufferOverflow); writing fewer leaves
    /// the tail of the buffer untouched.
    pub fn write(&self, samples: &[f32]) -> Result<(), AsioError> {
        if self.direction != Direction::Output {
            return Err(AsioError::NotAnOutputChannel(self.identity_string()));
        }
        let width = self.sample_type.byte_width();
        let mut state = self.state.lock();
        if !state.active {
            return Err(AsioError::InactiveChannel(self.identity_string()));
        }
        let slot = state.slot;
        let buffer = &mut state.buffers[slot.index()];
        let available = (buffer.bytes.len() - buffer.cursor) / width;
        if samples.len() > available {
            return Err(AsioError::BufferOverflow {
                requested: samples.len(),
                available,
            });
        }
        for &value in samples {
            let end = buffer.cursor + width;
            format::encode_sample(self.sample_type, value, &mut buffer.bytes[buffer.cursor..end])?;
            buffer.cursor = end;
        }
        Ok(())
    }

    /// Read normalized samples from the current input buffer, converting
    /// from the channel's native encoding.
    ///
    /// Mirrors [`write`](Channel::write): the cursor advances across calls,
    /// and asking for more samples than remain is a
    /// [`BufferOverflow`](AsioError::BufferOverflow).
    pub fn read(&self, out: &mut [f32]) -> Result<(), AsioError> {
        if self.direction != Direction::Input {
            return Err(AsioError::NotAnInputChannel(self.identity_string()));
        }
        let width = self.sample_type.byte_width();
        let mut state = self.state.lock();
        if !state.active {
            return Err(AsioError::InactiveChannel(self.identity_string()));
        }
        let slot = state.slot;
        let buffer = &mut state.buffers[slot.index()];
        let available = (buffer.bytes.len() - buffer.cursor) / width;
        if out.len() > available {
            return Err(AsioError::BufferOverflow {
                requested: out.len(),
                available,
            });
        }
        for value in out.iter_mut() {
            let end = buffer.cursor + width;
            *value = format::decode_sample(self.sample_type, &buffer.bytes[buffer.cursor..end])?;
            buffer.cursor = end;
        }
        Ok(())
    }

    /// Borrow the current block's raw bytes. The view is immutable; input
    /// buffers are never writable through the public API.
    pub fn with_raw_buffer<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, AsioError> {
        let state = self.state.lock();
        if !state.active {
            return Err(AsioError::InactiveChannel(self.identity_string()));
        }
        Ok(f(&state.buffers[state.slot.index()].bytes))
    }

    /// Borrow the current block's raw bytes mutably. Output channels only.
    pub fn with_raw_buffer_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, AsioError> {
        if self.direction != Direction::Output {
            return Err(AsioError::NotAnOutputChannel(self.identity_string()));
        }
        let mut state = self.state.lock();
        if !state.active {
            return Err(AsioError::InactiveChannel(self.identity_string()));
        }
        let slot = state.slot;
        Ok(f(&mut state.buffers[slot.index()].bytes))
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Channel) -> bool {
        self.index == other.index && self.direction == other.direction
    }
}

impl Eq for Channel {}

impl Hash for Channel {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.index.hash(hasher);
        self.direction.hash(hasher);
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {:?}, group {}, {}",
            self.identity_string(),
            self.sample_type,
            self.channel_group,
            if self.is_active() { "active" } else { "inactive" },
        )
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("index", &self.index)
            .field("direction", &self.direction)
            .field("sample_type", &self.sample_type)
            .field("name", &self.name)
            .finish()
    }
}

/// Owns every channel the driver reported, plus the subset currently
/// holding buffers. Enumeration happens once per driver; identities persist
/// until the driver is dropped.
pub(crate) struct ChannelRegistry {
    inputs: Vec<Arc<Channel>>,
    outputs: Vec<Arc<Channel>>,
    active: Arc<HashSet<Arc<Channel>>>,
}

impl ChannelRegistry {
    /// Query the native driver for every channel in both directions.
    pub(crate) fn enumerate(backend: &dyn NativeDriver) -> Result<ChannelRegistry, AsioError> {
        let mut registry = ChannelRegistry {
            inputs: Vec::new(),
            outputs: Vec::new(),
            active: Arc::new(HashSet::new()),
        };
        for direction in [Direction::Input, Direction::Output] {
            let count = backend.channel_count(direction)?;
            for index in 0..count {
                let desc = backend.channel_descriptor(index, direction)?;
                let channel = Channel::new(
                    desc.index,
                    direction,
                    desc.channel_group,
                    desc.sample_type,
                    desc.name,
                );
                match direction {
                    Direction::Input => registry.inputs.push(channel),
                    Direction::Output => registry.outputs.push(channel),
                }
            }
        }
        Ok(registry)
    }

    pub(crate) fn count(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Input => self.inputs.len() as u32,
            Direction::Output => self.outputs.len() as u32,
        }
    }

    pub(crate) fn channel(
        &self,
        index: u32,
        direction: Direction,
    ) -> Result<Arc<Channel>, AsioError> {
        let channels = match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        };
        channels
            .get(index as usize)
            .cloned()
            .ok_or(AsioError::ChannelOutOfRange {
                direction,
                index,
                count: channels.len() as u32,
            })
    }

    /// True when `channel` is the very instance this registry owns at its
    /// index. Guards against channels from another driver instance that
    /// would compare equal by identity.
    fn owns(&self, channel: &Arc<Channel>) -> bool {
        let channels = match channel.direction() {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        };
        channels
            .get(channel.index() as usize)
            .is_some_and(|own| Arc::ptr_eq(own, channel))
    }

    /// Check a requested activation set and flatten it to the
    /// `(index, direction)` pairs the native layer takes, sorted for a
    /// deterministic native call order. Runs before the native allocation
    /// so a bad set never reaches the driver.
    pub(crate) fn validate(
        &self,
        requested: &HashSet<Arc<Channel>>,
    ) -> Result<Vec<(u32, Direction)>, AsioError> {
        if requested.is_empty() {
            return Err(AsioError::EmptyChannelSet);
        }
        for channel in requested {
            if !self.owns(channel) {
                return Err(AsioError::ForeignChannel(channel.identity_string()));
            }
        }
        let mut pairs: Vec<(u32, Direction)> = requested
            .iter()
            .map(|channel| (channel.index(), channel.direction()))
            .collect();
        pairs.sort_by_key(|&(index, direction)| (direction != Direction::Input, index));
        Ok(pairs)
    }

    /// Make a defensive copy of a validated set and allocate each channel's
    /// double buffer.
    pub(crate) fn activate(&mut self, requested: &HashSet<Arc<Channel>>, block_frames: u32) {
        // Defensive copy: later mutation of the caller's set has no effect.
        let active: HashSet<Arc<Channel>> = requested.iter().cloned().collect();
        for channel in &active {
            channel.allocate(block_frames);
        }
        self.active = Arc::new(active);
    }

    /// Release every active channel's buffers and clear the active set.
    pub(crate) fn deactivate(&mut self) {
        for channel in self.active.iter() {
            channel.release();
        }
        self.active = Arc::new(HashSet::new());
    }

    /// The active set, cheaply cloneable for the dispatch path.
    pub(crate) fn active(&self) -> Arc<HashSet<Arc<Channel>>> {
        Arc::clone(&self.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_channel(index: u32, ty: SampleType) -> Arc<Channel> {
        Channel::new(index, Direction::Output, 0, ty, format!("Out {index}"))
    }

    fn input_channel(index: u32, ty: SampleType) -> Arc<Channel> {
        Channel::new(index, Direction::Input, 0, ty, format!("In {index}"))
    }

    #[test]
    fn identity_ignores_activation_state() {
        let a = output_channel(3, SampleType::Int32Lsb);
        let b = output_channel(3, SampleType::Int16Msb);
        a.allocate(64);
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn input_and_output_with_same_index_differ() {
        let out = output_channel(0, SampleType::Int32Lsb);
        let inp = input_channel(0, SampleType::Int32Lsb);
        assert_ne!(out, inp);
    }

    #[test]
    fn write_then_read_back_through_raw_buffer() {
        let out = output_channel(0, SampleType::Int16Lsb);
        out.allocate(4);
        out.write(&[0.5, -0.5, 1.0, -1.0]).unwrap();
        let bytes = out.with_raw_buffer(|raw| raw.to_vec()).unwrap();
        assert_eq!(bytes.len(), 8);
        let first = i16::from_le_bytes([bytes[0], bytes[1]]);
        assert_eq!(first, (0.5f64 * 32767.0).round() as i16);
    }

    #[test]
    fn write_past_block_end_is_an_overflow() {
        let out = output_channel(0, SampleType::Int32Lsb);
        out.allocate(4);
        out.write(&[0.0; 3]).unwrap();
        let err = out.write(&[0.0; 2]).unwrap_err();
        assert!(matches!(
            err,
            AsioError::BufferOverflow {
                requested: 2,
                available: 1
            }
        ));
    }

    #[test]
    fn partial_writes_land_back_to_back() {
        let out = output_channel(0, SampleType::Float32Lsb);
        out.allocate(4);
        out.write(&[0.25, 0.75]).unwrap();
        out.write(&[-0.25]).unwrap();
        let bytes = out.with_raw_buffer(|raw| raw.to_vec()).unwrap();
        let third = f32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(third, -0.25);
    }

    #[test]
    fn slot_switch_rewinds_cursor() {
        let out = output_channel(0, SampleType::Float32Lsb);
        out.allocate(2);
        out.write(&[0.1, 0.2]).unwrap();
        out.set_buffer_slot(BufferSlot::B);
        out.set_buffer_slot(BufferSlot::A);
        out.write(&[0.3, 0.4]).unwrap();
        let bytes = out.with_raw_buffer(|raw| raw.to_vec()).unwrap();
        let first = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(first, 0.3);
    }

    #[test]
    fn direction_and_activation_are_enforced() {
        let inp = input_channel(0, SampleType::Int16Lsb);
        assert!(matches!(
            inp.write(&[0.0]),
            Err(AsioError::NotAnOutputChannel(_))
        ));
        let out = output_channel(0, SampleType::Int16Lsb);
        let mut scratch = [0.0f32];
        assert!(matches!(
            out.read(&mut scratch),
            Err(AsioError::NotAnInputChannel(_))
        ));
        assert!(matches!(
            out.write(&[0.0]),
            Err(AsioError::InactiveChannel(_))
        ));
        assert!(matches!(
            out.with_raw_buffer_mut(|_| ()),
            Err(AsioError::InactiveChannel(_))
        ));
        assert!(matches!(
            inp.with_raw_buffer_mut(|_| ()),
            Err(AsioError::NotAnOutputChannel(_))
        ));
    }

    #[test]
    fn activation_set_is_validated_and_copied() {
        let mut registry = ChannelRegistry {
            inputs: vec![input_channel(0, SampleType::Int16Lsb)],
            outputs: vec![output_channel(0, SampleType::Int16Lsb)],
            active: Arc::new(HashSet::new()),
        };
        assert!(matches!(
            registry.validate(&HashSet::new()),
            Err(AsioError::EmptyChannelSet)
        ));

        // Equal identity, different instance: not owned by this registry.
        let mut foreign = HashSet::new();
        foreign.insert(output_channel(0, SampleType::Int16Lsb));
        assert!(matches!(
            registry.validate(&foreign),
            Err(AsioError::ForeignChannel(_))
        ));

        let mut set = HashSet::new();
        set.insert(registry.outputs[0].clone());
        let pairs = registry.validate(&set).unwrap();
        assert_eq!(pairs, vec![(0, Direction::Output)]);

        registry.activate(&set, 8);
        assert!(registry.outputs[0].is_active());
        set.clear();
        assert_eq!(registry.active().len(), 1);

        registry.deactivate();
        assert!(!registry.outputs[0].is_active());
        assert!(registry.active().is_empty());
    }

    #[test]
    fn input_read_decodes_deposited_bytes() {
        let inp = input_channel(1, SampleType::Int24Lsb);
        inp.allocate(2);
        let mut raw = vec![0u8; 6];
        format::encode_sample(SampleType::Int24Lsb, 0.5, &mut raw[0..3]).unwrap();
        format::encode_sample(SampleType::Int24Lsb, -0.5, &mut raw[3..6]).unwrap();
        inp.fill_slot(BufferSlot::A, &raw);
        inp.set_buffer_slot(BufferSlot::A);
        let mut out = [0.0f32; 2];
        inp.read(&mut out).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] + 0.5).abs() < 1e-6);
    }
}
