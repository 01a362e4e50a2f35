//! Available-memory probe used before loading the transformer model.

use sysinfo::System;

/// Source of the "how much memory can we still use" signal.
pub trait MemoryProbe: Send + Sync {
    /// Available memory in MiB, or `None` when the platform does not report it.
    fn available_mb(&self) -> Option<u64>;
}

/// Reads available memory from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_mb(&self) -> Option<u64> {
        let mut sys = System::new();
        sys.refresh_memory();
        match sys.available_memory() / (1024 * 1024) {
            0 => None,
            mb => Some(mb),
        }
    }
}

/// Fixed reading, for deployments that know their budget up front and for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub Option<u64>);

impl MemoryProbe for FixedMemory {
    fn available_mb(&self) -> Option<u64> {
        self.0
    }
}
