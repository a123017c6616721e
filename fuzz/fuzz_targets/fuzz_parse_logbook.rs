#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let _ = valvelink::source::parse_logbook(text, ';', 2);
    let _ = valvelink::source::parse_logbook(text, ',', 0);
});
