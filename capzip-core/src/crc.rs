//! CRC-32 (ISO 3309) as used by ZIP.
//!
//! The table-driven work is done by `crc32fast`, which picks a SIMD
//! implementation at runtime where the CPU supports one. [`Crc32`] keeps
//! the streaming `new`/`update`/`finalize` shape used by the codecs.

/// Streaming CRC-32 calculator.
#[derive(Debug, Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    /// Create a new CRC-32 calculator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the initial state.
    pub fn reset(&mut self) {
        self.hasher.reset();
    }

    /// Update the CRC with more data.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Get the CRC of everything fed so far without consuming the calculator.
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Finalize and return the CRC value.
    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }

    /// Compute the CRC-32 of a buffer in one shot.
    pub fn compute(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}
