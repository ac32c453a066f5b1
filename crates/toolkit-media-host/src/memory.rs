//! Guest linear memory access.
//!
//! The single-threaded engine build exports an ordinary memory, the
//! multi-threaded build a shared one. Host functions go through
//! [`GuestMemory`] so they work against either.

use std::ops::Range;

use toolkit_media_common::HostFunctionError;
use toolkit_media_core::EngineContext;
use wasmtime::{Caller, Extern, Memory, SharedMemory};

/// The guest's exported `memory`.
pub enum GuestMemory {
    /// Ordinary linear memory.
    Plain(Memory),
    /// Shared linear memory (threads proposal).
    Shared(SharedMemory),
}

impl GuestMemory {
    /// Look up the calling instance's `memory` export.
    pub fn from_caller(caller: &mut Caller<'_, EngineContext>) -> Result<Self, HostFunctionError> {
        match caller.get_export("memory") {
            Some(Extern::Memory(memory)) => Ok(Self::Plain(memory)),
            Some(Extern::SharedMemory(memory)) => Ok(Self::Shared(memory)),
            _ => Err(HostFunctionError::MissingMemory),
        }
    }

    /// Current size in bytes.
    pub fn size(&self, caller: &Caller<'_, EngineContext>) -> usize {
        match self {
            Self::Plain(memory) => memory.data_size(caller),
            Self::Shared(memory) => memory.data_size(),
        }
    }

    /// Copy `len` bytes out of guest memory starting at `ptr`.
    pub fn read(
        &self,
        caller: &Caller<'_, EngineContext>,
        ptr: i32,
        len: i32,
    ) -> Result<Vec<u8>, HostFunctionError> {
        let range = checked_range(ptr, len, self.size(caller))?;

        match self {
            Self::Plain(memory) => Ok(memory.data(caller)[range].to_vec()),
            Self::Shared(memory) => {
                let cells = &memory.data()[range];
                // SAFETY: the range is in bounds. Other guest threads may race
                // on these bytes; the copy is a snapshot, as with any
                // unsynchronized read of shared memory.
                #[allow(unsafe_code)]
                let bytes = cells.iter().map(|cell| unsafe { *cell.get() }).collect();
                Ok(bytes)
            }
        }
    }

    /// Copy `bytes` into guest memory starting at `ptr`.
    pub fn write(
        &self,
        caller: &mut Caller<'_, EngineContext>,
        ptr: i32,
        bytes: &[u8],
    ) -> Result<(), HostFunctionError> {
        let len = i32::try_from(bytes.len()).map_err(|_| HostFunctionError::OutOfBounds {
            ptr: i64::from(ptr),
            len: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
        })?;
        let range = checked_range(ptr, len, self.size(caller))?;

        match self {
            Self::Plain(memory) => {
                memory.data_mut(caller)[range].copy_from_slice(bytes);
            }
            Self::Shared(memory) => {
                let cells = &memory.data()[range];
                for (cell, byte) in cells.iter().zip(bytes) {
                    // SAFETY: in bounds; see `read`.
                    #[allow(unsafe_code)]
                    unsafe {
                        *cell.get() = *byte;
                    }
                }
            }
        }
        Ok(())
    }

    /// Read a UTF-8 string. Invalid UTF-8 yields `None`.
    pub fn read_str(
        &self,
        caller: &Caller<'_, EngineContext>,
        ptr: i32,
        len: i32,
    ) -> Result<Option<String>, HostFunctionError> {
        let bytes = self.read(caller, ptr, len)?;
        Ok(String::from_utf8(bytes).ok())
    }
}

/// Validate a guest pointer/length pair against a memory size.
pub fn checked_range(ptr: i32, len: i32, size: usize) -> Result<Range<usize>, HostFunctionError> {
    let out_of_bounds = || HostFunctionError::OutOfBounds {
        ptr: i64::from(ptr),
        len: i64::from(len),
    };

    let start = usize::try_from(ptr).map_err(|_| out_of_bounds())?;
    let len = usize::try_from(len).map_err(|_| out_of_bounds())?;
    let end = start.checked_add(len).ok_or_else(out_of_bounds)?;

    if end > size {
        return Err(out_of_bounds());
    }
    Ok(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_range() {
        assert_eq!(checked_range(0, 4, 16).unwrap(), 0..4);
        assert_eq!(checked_range(12, 4, 16).unwrap(), 12..16);
        assert_eq!(checked_range(16, 0, 16).unwrap(), 16..16);
    }

    #[test]
    fn test_checked_range_rejects() {
        assert!(matches!(
            checked_range(-1, 4, 16),
            Err(HostFunctionError::OutOfBounds { ptr: -1, len: 4 })
        ));
        assert!(checked_range(0, -4, 16).is_err());
        assert!(checked_range(13, 4, 16).is_err());
        assert!(checked_range(i32::MAX, i32::MAX, usize::MAX).is_ok());
    }
}
