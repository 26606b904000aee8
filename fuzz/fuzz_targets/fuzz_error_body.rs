#![no_main]

use comprobantes::core::ExternalError;
use comprobantes::lifecycle::{blocking_log, detect};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let status = u16::from_be_bytes([data[0], data[1]]);
    let body = String::from_utf8_lossy(&data[2..]);
    let err = ExternalError::from_body(status, &body);
    let _ = detect(&err);
    let _ = blocking_log(&err);
});
