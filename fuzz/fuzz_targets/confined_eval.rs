#![no_main]
use libfuzzer_sys::fuzz_target;
use primlock_core::{lockdown, LockdownConfig, Permit};
use primlock_heap::Heap;

// Whole-pipeline target: lock a fresh world, then throw arbitrary source
// at the confined evaluator. Rejections and runtime faults are expected;
// panics and authority leaks are not.
fuzz_target!(|data: &[u8]| {
    let Ok(src) = std::str::from_utf8(data) else { return };
    let mut heap = Heap::new();
    let Ok(outcome) = lockdown(&mut heap, &Permit::subtree([]), LockdownConfig::default()) else {
        return;
    };
    if !outcome.report.ok {
        return;
    }
    let _ = outcome.vat.confine(&mut heap, src, None);
    assert!(heap.is_frozen(heap.intrinsics().object_prototype));
    assert!(heap.is_frozen(heap.global()));
});
