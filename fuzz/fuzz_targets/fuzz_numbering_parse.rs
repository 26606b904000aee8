#![no_main]

use comprobantes::core::{NumberingMethod, sequence_suffix};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let _ = sequence_suffix(s);
    if let Ok(method) = NumberingMethod::parse(s) {
        if let Some(number) = method.sequence().filter(|n| *n > 0) {
            // An accepted method formats its own sequence back to a parseable number.
            let formatted = method.format_number(number).expect("parsed sequence should format");
            assert_eq!(sequence_suffix(&formatted), Some(number));
        }
    }
});
