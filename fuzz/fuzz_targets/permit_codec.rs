#![no_main]
use libfuzzer_sys::fuzz_target;
use primlock_core::Permit;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(tree) = serde_json::from_str::<Permit>(s) {
            let encoded = serde_json::to_string(&tree).expect("permits always encode");
            let _ = serde_json::from_str::<Permit>(&encoded);
        }
    }
});
