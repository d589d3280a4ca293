// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory mock actuator.
//!
//! Reads are served from a scripted state map, writes are recorded and
//! reflected back into that map (so verification read-backs succeed unless a
//! test sabotages the state in between). Failure injection covers the error
//! paths the coordinator must survive: transient I/O errors and timeouts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use tether_core::{ActuatorError, MemoryActuator, MemoryHandle, Quat, Vec3};

/// One recorded transform write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedWrite {
    /// Target handle.
    pub handle: MemoryHandle,
    /// Written position.
    pub position: Vec3,
    /// Written rotation.
    pub rotation: Quat,
    /// True when the write went through the immediate (snap) path.
    pub snap: bool,
}

#[derive(Default)]
struct MockState {
    transforms: HashMap<MemoryHandle, (Vec3, Quat)>,
    healths: HashMap<MemoryHandle, (f32, f32)>,
    writes: Vec<RecordedWrite>,
    fail_reads: u64,
    fail_writes: u64,
    timeout_reads: u64,
}

/// Scripted in-memory [`MemoryActuator`].
#[derive(Default)]
pub struct MockActuator {
    state: Mutex<MockState>,
    read_count: AtomicU64,
    write_count: AtomicU64,
}

impl MockActuator {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the transform a read of `handle` will return.
    pub fn set_transform(&self, handle: MemoryHandle, position: Vec3, rotation: Quat) {
        self.state.lock().transforms.insert(handle, (position, rotation));
    }

    /// Scripts the health a read of `handle` will return.
    pub fn set_health(&self, handle: MemoryHandle, current: f32, maximum: f32) {
        self.state.lock().healths.insert(handle, (current, maximum));
    }

    /// The transform currently stored for `handle`.
    #[must_use]
    pub fn transform(&self, handle: MemoryHandle) -> Option<(Vec3, Quat)> {
        self.state.lock().transforms.get(&handle).copied()
    }

    /// All recorded transform writes, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.lock().writes.clone()
    }

    /// Recorded snap writes only.
    #[must_use]
    pub fn snap_writes(&self) -> Vec<RecordedWrite> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.snap)
            .copied()
            .collect()
    }

    /// Total reads served (including failures).
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Acquire)
    }

    /// Total writes attempted (including failures).
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Acquire)
    }

    /// Makes the next `n` reads fail with an I/O error.
    pub fn fail_next_reads(&self, n: u64) {
        self.state.lock().fail_reads = n;
    }

    /// Makes the next `n` writes fail with an I/O error.
    pub fn fail_next_writes(&self, n: u64) {
        self.state.lock().fail_writes = n;
    }

    /// Makes the next `n` reads time out.
    pub fn timeout_next_reads(&self, n: u64) {
        self.state.lock().timeout_reads = n;
    }
}

impl MemoryActuator for MockActuator {
    fn read_transform(
        &self,
        handle: MemoryHandle,
    ) -> Result<Option<(Vec3, Quat)>, ActuatorError> {
        self.read_count.fetch_add(1, Ordering::AcqRel);
        let mut state = self.state.lock();
        if state.timeout_reads > 0 {
            state.timeout_reads -= 1;
            return Err(ActuatorError::Timeout);
        }
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(ActuatorError::Io("injected read failure".to_owned()));
        }
        Ok(state.transforms.get(&handle).copied())
    }

    fn read_health(&self, handle: MemoryHandle) -> Result<Option<(f32, f32)>, ActuatorError> {
        Ok(self.state.lock().healths.get(&handle).copied())
    }

    fn write_transform(
        &self,
        handle: MemoryHandle,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), ActuatorError> {
        self.write_count.fetch_add(1, Ordering::AcqRel);
        let mut state = self.state.lock();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(ActuatorError::Io("injected write failure".to_owned()));
        }
        state.transforms.insert(handle, (position, rotation));
        state.writes.push(RecordedWrite {
            handle,
            position,
            rotation,
            snap: false,
        });
        Ok(())
    }

    fn write_transform_immediate(
        &self,
        handle: MemoryHandle,
        position: Vec3,
        rotation: Quat,
    ) -> Result<(), ActuatorError> {
        self.write_count.fetch_add(1, Ordering::AcqRel);
        let mut state = self.state.lock();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(ActuatorError::Io("injected write failure".to_owned()));
        }
        state.transforms.insert(handle, (position, rotation));
        state.writes.push(RecordedWrite {
            handle,
            position,
            rotation,
            snap: true,
        });
        Ok(())
    }

    fn write_health(
        &self,
        handle: MemoryHandle,
        current: f32,
        maximum: f32,
    ) -> Result<(), ActuatorError> {
        self.state.lock().healths.insert(handle, (current, maximum));
        Ok(())
    }
}
