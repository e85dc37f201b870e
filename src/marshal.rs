//! Copying strings and byte buffers across the native memory boundary.
//!
//! Host data is written into a fresh native allocation that lives exactly as
//! long as the callback using it; an [`Allocation`] guard frees it on every
//! exit path, unwinding included.

use crate::constants::Status;
use crate::error::NativeError;
use crate::native::NativeExports;

const READ_CHUNK: usize = 256;

/// Native allocation released on drop.
struct Allocation<'a> {
    exports: &'a dyn NativeExports,
    ptr: i32,
}

impl<'a> Allocation<'a> {
    fn copy_in(
        exports: &'a dyn NativeExports,
        data: &[u8],
        nul_terminate: bool,
    ) -> Result<Self, NativeError> {
        let size = i32::try_from(data.len() + usize::from(nul_terminate)).map_err(|_| {
            NativeError::new("value too large for native memory", Status::TooBig.code())
        })?;
        let ptr = exports.malloc(size);
        if ptr == 0 {
            return Err(NativeError::new("out of memory", Status::NoMem.code()));
        }
        let allocation = Self { exports, ptr };
        let written = if nul_terminate {
            let mut buf = Vec::with_capacity(data.len() + 1);
            buf.extend_from_slice(data);
            buf.push(0);
            exports.memory_write(ptr, &buf)
        } else {
            exports.memory_write(ptr, data)
        };
        if !written {
            return Err(NativeError::new(
                "failed to write to native memory",
                Status::Misuse.code(),
            ));
        }
        Ok(allocation)
    }
}

impl Drop for Allocation<'_> {
    fn drop(&mut self) {
        self.exports.free(self.ptr);
    }
}

/// Copy `text` into native memory as a NUL-terminated UTF-8 string and call
/// `f` with its pointer. The allocation is freed once `f` returns.
///
/// # Errors
/// Returns a [`NativeError`] carrying `SQLITE_NOMEM` when the allocation fails.
pub fn with_string<R>(
    exports: &dyn NativeExports,
    text: &str,
    f: impl FnOnce(i32) -> R,
) -> Result<R, NativeError> {
    let allocation = Allocation::copy_in(exports, text.as_bytes(), true)?;
    Ok(f(allocation.ptr))
}

/// Copy `bytes` into native memory and call `f` with the pointer and length.
///
/// # Errors
/// Returns a [`NativeError`] carrying `SQLITE_NOMEM` when the allocation fails.
pub fn with_bytes<R>(
    exports: &dyn NativeExports,
    bytes: &[u8],
    f: impl FnOnce(i32, i32) -> R,
) -> Result<R, NativeError> {
    let allocation = Allocation::copy_in(exports, bytes, false)?;
    // copy_in already checked the length fits in i32
    let len = i32::try_from(bytes.len()).unwrap_or(i32::MAX);
    Ok(f(allocation.ptr, len))
}

/// Decode the module-owned NUL-terminated string at `ptr`. Does not free it.
/// A null pointer reads as the empty string.
#[must_use]
pub fn read_string(exports: &dyn NativeExports, ptr: i32) -> String {
    if ptr == 0 {
        return String::new();
    }
    let mut bytes = Vec::new();
    let mut cursor = ptr;
    loop {
        let chunk = exports.memory_read(cursor, READ_CHUNK);
        if let Some(end) = chunk.iter().position(|&b| b == 0) {
            bytes.extend_from_slice(&chunk[..end]);
            break;
        }
        bytes.extend_from_slice(&chunk);
        if chunk.len() < READ_CHUNK {
            break;
        }
        let Some(next) = i32::try_from(READ_CHUNK)
            .ok()
            .and_then(|step| cursor.checked_add(step))
        else {
            break;
        };
        cursor = next;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Copy `len` module-owned bytes starting at `ptr`.
#[must_use]
pub fn read_bytes(exports: &dyn NativeExports, ptr: i32, len: i32) -> Vec<u8> {
    match usize::try_from(len) {
        Ok(len) if ptr != 0 && len > 0 => exports.memory_read(ptr, len),
        _ => Vec::new(),
    }
}
