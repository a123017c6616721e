#![no_main]
use libfuzzer_sys::fuzz_target;
use valvelink::protocol::{classify_line, SerialEvent};

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);
    let event = classify_line(&line);
    if line.trim().starts_with(valvelink::protocol::VALVE_TARGET_POSITION_PREFIX) {
        assert!(!matches!(event, SerialEvent::RawLine(_)));
    }
});
