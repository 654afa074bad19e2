#![no_main]
use libfuzzer_sys::fuzz_target;
use primlock_heap::Heap;

fuzz_target!(|data: &[u8]| {
    if let Ok(src) = std::str::from_utf8(data) {
        let heap = Heap::new();
        let _ = heap.compile_expression(src);
        let _ = heap.compile_body(src);
    }
});
