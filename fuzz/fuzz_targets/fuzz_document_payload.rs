#![no_main]

use comprobantes::core::{Direction, Document};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    for direction in [Direction::Sales, Direction::Purchase] {
        if let Ok(doc) = Document::from_payload(direction, &value) {
            let _ = doc.to_payload();
        }
    }
});
