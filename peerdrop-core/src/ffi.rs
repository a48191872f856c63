//! C ABI for linking peerdrop-core as a static library from Android (NDK) or other C/C++ hosts.
//! Hosts that drive their own sockets use these to speak the transfer framing.

use std::os::raw::c_int;
use std::slice;

use crate::progress;
use crate::wire::{decode_header, encode_header, FrameDecodeError};

/// Framing version exported so the staticlib has a C symbol and hosts can check compatibility.
pub const FRAMING_VERSION: u8 = 1;

#[no_mangle]
pub extern "C" fn peerdrop_core_version() -> u8 {
    FRAMING_VERSION
}

/// Fixed TCP port the group owner listens on.
#[no_mangle]
pub extern "C" fn peerdrop_transfer_port() -> u16 {
    crate::wire::TRANSFER_PORT
}

/// Encode a file header. `name` is UTF-8 of `name_len` bytes. Returns bytes written, or -1 on
/// error (null pointer, invalid UTF-8, negative size, name too long, or `out_buf` too small).
#[no_mangle]
pub extern "C" fn peerdrop_encode_header(
    name: *const u8,
    name_len: usize,
    file_size: i64,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if name.is_null() || out_buf.is_null() || file_size < 0 {
        return -1;
    }
    let name = unsafe { slice::from_raw_parts(name, name_len) };
    let name = match std::str::from_utf8(name) {
        Ok(s) => s,
        Err(_) => return -1,
    };
    let frame = match encode_header(name, file_size as u64) {
        Ok(f) => f,
        Err(_) => return -1,
    };
    if frame.len() > out_buf_len {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(frame.as_ptr(), frame.len());
    }
    frame.len() as c_int
}

/// Decode a file header from the front of `bytes`. On success writes the UTF-8 name into
/// `out_name` (up to `out_name_cap` bytes), its length into `out_name_len`, the size into
/// `out_size`, and returns the number of header bytes consumed. Returns 0 if more bytes are
/// needed, -1 on a malformed header or a too-small name buffer.
#[no_mangle]
pub extern "C" fn peerdrop_decode_header(
    bytes: *const u8,
    len: usize,
    out_name: *mut u8,
    out_name_cap: usize,
    out_name_len: *mut usize,
    out_size: *mut u64,
) -> c_int {
    if bytes.is_null() || out_name.is_null() || out_name_len.is_null() || out_size.is_null() {
        return -1;
    }
    let slice = unsafe { slice::from_raw_parts(bytes, len) };
    let (header, consumed) = match decode_header(slice) {
        Ok(x) => x,
        Err(FrameDecodeError::NeedMore) => return 0,
        Err(_) => return -1,
    };
    let name = header.file_name.as_bytes();
    if name.len() > out_name_cap {
        return -1;
    }
    unsafe {
        out_name.copy_from_nonoverlapping(name.as_ptr(), name.len());
        *out_name_len = name.len();
        *out_size = header.file_size;
    }
    consumed as c_int
}

/// Progress percentage (0-100) for a byte count.
#[no_mangle]
pub extern "C" fn peerdrop_progress_percent(transferred: u64, total: u64) -> u8 {
    progress::percent(transferred, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_through_c_abi() {
        let name = "notes.txt";
        let mut frame = [0u8; 64];
        let n = peerdrop_encode_header(name.as_ptr(), name.len(), 1234, frame.as_mut_ptr(), frame.len());
        assert_eq!(n, 2 + 9 + 8);

        let mut out_name = [0u8; 32];
        let mut out_name_len = 0usize;
        let mut out_size = 0u64;
        let consumed = peerdrop_decode_header(
            frame.as_ptr(),
            n as usize,
            out_name.as_mut_ptr(),
            out_name.len(),
            &mut out_name_len,
            &mut out_size,
        );
        assert_eq!(consumed, n);
        assert_eq!(&out_name[..out_name_len], name.as_bytes());
        assert_eq!(out_size, 1234);
    }

    #[test]
    fn partial_and_invalid_input() {
        let name = "x";
        let mut frame = [0u8; 16];
        let n = peerdrop_encode_header(name.as_ptr(), 1, 5, frame.as_mut_ptr(), frame.len());
        let mut out_name = [0u8; 4];
        let mut out_name_len = 0usize;
        let mut out_size = 0u64;
        let r = peerdrop_decode_header(
            frame.as_ptr(),
            (n - 1) as usize,
            out_name.as_mut_ptr(),
            out_name.len(),
            &mut out_name_len,
            &mut out_size,
        );
        assert_eq!(r, 0);

        assert_eq!(
            peerdrop_encode_header(name.as_ptr(), 1, -1, frame.as_mut_ptr(), frame.len()),
            -1
        );
        assert_eq!(
            peerdrop_encode_header(name.as_ptr(), 1, 5, frame.as_mut_ptr(), 4),
            -1
        );
    }

    #[test]
    fn exported_constants() {
        assert_eq!(peerdrop_transfer_port(), 8988);
        assert_eq!(peerdrop_progress_percent(1, 2), 50);
        assert_eq!(peerdrop_progress_percent(0, 0), 100);
    }
}
