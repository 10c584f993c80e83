//! C ABI for linking teol0-core as a static library from C/C++ hosts.
//! Covers the codec, the stream reassembler and echo timing; the host owns the socket.

use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int};
use std::slice;

use crate::echo::round_trip_ms;
use crate::protocol::CLIENT_VERSION_NUL;
use crate::reassembly::{FrameReassembler, NextFrame};
use crate::wire::{decode_packet, encode_packet, CodecError};

/// Library version as a NUL-terminated string. Static; do not free.
#[no_mangle]
pub extern "C" fn teol0_version() -> *const c_char {
    CLIENT_VERSION_NUL.as_ptr() as *const c_char
}

/// Encode a packet into out_buf. peer_name may be null (packet for the relay itself).
/// Returns bytes written, or -1 on bad arguments, oversize packet or small buffer.
#[no_mangle]
pub extern "C" fn teol0_packet_create(
    command: u8,
    peer_name: *const c_char,
    data: *const u8,
    data_len: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if out_buf.is_null() || (data.is_null() && data_len > 0) {
        return -1;
    }
    let peer = if peer_name.is_null() {
        ""
    } else {
        match unsafe { CStr::from_ptr(peer_name) }.to_str() {
            Ok(s) => s,
            Err(_) => return -1,
        }
    };
    let payload: &[u8] = if data_len == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(data, data_len) }
    };
    let frame = match encode_packet(command, peer, payload, out_buf_len) {
        Ok(f) => f,
        Err(_) => return -1,
    };
    unsafe {
        out_buf.copy_from_nonoverlapping(frame.as_ptr(), frame.len());
    }
    frame.len() as c_int
}

/// Validate the frame at the front of buf. Returns its length, -1 if more bytes are needed,
/// -2 if a checksum fails.
#[no_mangle]
pub extern "C" fn teol0_packet_check(buf: *const u8, buf_len: usize) -> c_int {
    if buf.is_null() {
        return -1;
    }
    let bytes = unsafe { slice::from_raw_parts(buf, buf_len) };
    match decode_packet(bytes) {
        Ok(p) => p.frame_len() as c_int,
        Err(CodecError::BufferTooShort { .. }) => -1,
        Err(_) => -2,
    }
}

/// Trip time in milliseconds of an echo answer payload. Negative if the payload is malformed.
#[no_mangle]
pub extern "C" fn teol0_echo_trip_time_ms(payload: *const u8, payload_len: usize) -> f64 {
    if payload.is_null() {
        return -1.0;
    }
    let bytes = unsafe { slice::from_raw_parts(payload, payload_len) };
    round_trip_ms(bytes).unwrap_or(-1.0)
}

/// Create a stream reassembler. Returns opaque handle.
#[no_mangle]
pub extern "C" fn teol0_reassembler_create(max_frame_size: usize) -> *mut c_void {
    Box::into_raw(Box::new(FrameReassembler::new(max_frame_size))) as *mut c_void
}

/// Destroy reassembler. No-op if h is null.
#[no_mangle]
pub extern "C" fn teol0_reassembler_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut FrameReassembler) };
}

/// Append bytes read from the socket. Returns 0, or -1 if the buffer limit would be exceeded.
#[no_mangle]
pub extern "C" fn teol0_reassembler_feed(h: *mut c_void, data: *const u8, data_len: usize) -> c_int {
    if h.is_null() || data.is_null() {
        return -1;
    }
    let r = unsafe { &mut *(h as *mut FrameReassembler) };
    let bytes = unsafe { slice::from_raw_parts(data, data_len) };
    match r.feed(bytes) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Copy the next complete frame to out_buf. Returns its length, -1 not yet complete, -2 invalid
/// (poll again), -3 fatal (declared frame over limit, or out_buf too small; the frame is lost).
#[no_mangle]
pub extern "C" fn teol0_reassembler_next(
    h: *mut c_void,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    if h.is_null() || out_buf.is_null() {
        return -3;
    }
    let r = unsafe { &mut *(h as *mut FrameReassembler) };
    match r.next_frame() {
        Ok(NextFrame::Frame(frame)) => {
            if frame.len() > out_buf_len {
                return -3;
            }
            unsafe {
                out_buf.copy_from_nonoverlapping(frame.as_ptr(), frame.len());
            }
            frame.len() as c_int
        }
        Ok(other) => other.code() as c_int,
        Err(_) => -3,
    }
}
