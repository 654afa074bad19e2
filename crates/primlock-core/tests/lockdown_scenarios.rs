use primlock_core::{
    lockdown, EvalError, LockdownConfig, LockdownError, LockdownOutcome, Permit, Severity,
};
use primlock_heap::{Heap, PropertyDescriptor, Quirks, Value};

fn install_clock(heap: &mut Heap) {
    let global = heap.global();
    let clock = heap.alloc_plain();
    let now = heap.alloc_native("now", |_, _, _| Ok(Value::Num(1_234.0)));
    let secret = heap.alloc_native("secret", |_, _, _| Ok(Value::str("t0p")));
    heap.set(clock, "now", Value::Obj(now)).expect("set now");
    heap.set(clock, "secret", Value::Obj(secret)).expect("set secret");
    heap.set(global, "clock", Value::Obj(clock)).expect("set clock");
}

fn clock_permits() -> Permit {
    Permit::subtree([("clock", Permit::subtree([("now", Permit::AllowAsIs)]))])
}

fn locked_clock() -> (Heap, LockdownOutcome) {
    let mut heap = Heap::new();
    install_clock(&mut heap);
    let outcome =
        lockdown(&mut heap, &clock_permits(), LockdownConfig::default()).expect("lockdown runs");
    (heap, outcome)
}

#[test]
fn unnamed_clock_property_is_removed_with_a_paper_trail() {
    let (_, outcome) = locked_clock();
    assert!(outcome.report.ok, "report:\n{}", outcome.report.render_human());
    let at_secret: Vec<_> = outcome.report.at_path("<root>.clock.secret").collect();
    assert_eq!(at_secret.len(), 1);
    assert_eq!(at_secret[0].status, "Deleted");
    assert_eq!(at_secret[0].severity, Severity::Safe);
    assert_eq!(outcome.report.at_path("<root>.clock.now").count(), 0);
}

#[test]
fn permitted_surface_works_and_removed_surface_faults() {
    let (mut heap, outcome) = locked_clock();
    assert!(outcome.vat.is_locked());
    let ticks = outcome.vat.confine(&mut heap, "clock.now()", None).expect("now is kept");
    assert_eq!(ticks, Value::Num(1_234.0));
    match outcome.vat.confine(&mut heap, "clock.secret()", None) {
        Err(EvalError::Runtime(_)) => {}
        other => panic!("expected a runtime fault on the removed method, got {other:?}"),
    }
    let gone = outcome.vat.confine(&mut heap, "typeof clock.secret", None).expect("typeof");
    assert_eq!(gone, Value::str("undefined"));
}

#[test]
fn stuck_property_fails_the_pass_and_keeps_the_vat_dark() {
    let mut heap = Heap::new();
    let global = heap.global();
    let clock = heap.alloc_plain();
    let secret = heap.alloc_native("secret", |_, _, _| Ok(Value::str("t0p")));
    heap.define_property(
        clock,
        "secret",
        PropertyDescriptor::Data {
            value: Value::Obj(secret),
            writable: false,
            enumerable: true,
            configurable: false,
        },
    )
    .expect("define secret");
    heap.set_quirks(clock, Quirks::DELETE_REFUSES);
    heap.set(global, "clock", Value::Obj(clock)).expect("set clock");

    let outcome =
        lockdown(&mut heap, &clock_permits(), LockdownConfig::default()).expect("lockdown runs");
    assert!(!outcome.report.ok);
    assert_eq!(outcome.report.max_severity, Severity::NotIsolated);
    let stuck: Vec<_> = outcome.report.with_status("Cannot be poisoned").collect();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].path, "<root>.clock.secret");

    assert!(!outcome.vat.is_locked());
    match outcome.vat.compile_expr(&mut heap, "1 + 1") {
        Err(EvalError::NotLocked) => {}
        other => panic!("expected the vat to refuse, got {other:?}"),
    }
    match outcome.vat.confine(&mut heap, "1 + 1", None) {
        Err(EvalError::NotLocked) => {}
        other => panic!("expected the vat to refuse, got {other:?}"),
    }
}

#[test]
fn bounced_deletion_is_an_isolation_defect() {
    let mut heap = Heap::new();
    let global = heap.global();
    let leaky = heap.alloc_plain();
    heap.set(leaky, "ghost", Value::Num(7.0)).expect("set ghost");
    heap.set_quirks(leaky, Quirks::DELETE_BOUNCES);
    heap.set(global, "leaky", Value::Obj(leaky)).expect("set leaky");

    let permits = Permit::subtree([("leaky", Permit::subtree([]))]);
    let outcome = lockdown(&mut heap, &permits, LockdownConfig::default()).expect("lockdown runs");
    assert!(!outcome.report.ok);
    let bounced: Vec<_> = outcome.report.with_status("Bounced back").collect();
    assert_eq!(bounced.len(), 1);
    assert_eq!(bounced[0].path, "<root>.leaky.ghost");
    assert_eq!(bounced[0].severity, Severity::NotIsolated);
}

#[test]
fn raised_threshold_tolerates_recorded_defects() {
    let mut heap = Heap::new();
    let global = heap.global();
    let leaky = heap.alloc_plain();
    heap.set(leaky, "ghost", Value::Num(7.0)).expect("set ghost");
    heap.set_quirks(leaky, Quirks::DELETE_BOUNCES);
    heap.set(global, "leaky", Value::Obj(leaky)).expect("set leaky");

    let permits = Permit::subtree([("leaky", Permit::subtree([]))]);
    let config = LockdownConfig { threshold: Severity::NotIsolated, ..LockdownConfig::default() };
    let outcome = lockdown(&mut heap, &permits, config).expect("lockdown runs");
    assert!(outcome.report.ok);
    assert_eq!(outcome.report.max_severity, Severity::NotIsolated);
    assert!(outcome.vat.is_locked());
}

#[test]
fn freeze_refusal_aborts_the_pass() {
    let mut heap = Heap::new();
    let global = heap.global();
    let sticky = heap.alloc_plain();
    heap.set_quirks(sticky, Quirks::FREEZE_REFUSES);
    heap.set(global, "sticky", Value::Obj(sticky)).expect("set sticky");

    let permits = Permit::subtree([("sticky", Permit::AllowAsIs)]);
    match lockdown(&mut heap, &permits, LockdownConfig::default()) {
        Err(LockdownError::DefenseFailed { path, .. }) => assert_eq!(path, "<root>.sticky"),
        Err(other) => panic!("unexpected failure: {other:?}"),
        Ok(_) => panic!("expected the defense sweep to abort"),
    }
}

#[test]
fn subscribers_observe_the_pass_without_steering_it() {
    fn run() -> (Vec<(Severity, String, String)>, Vec<String>, bool) {
        let mut heap = Heap::new();
        install_clock(&mut heap);
        let outcome = lockdown(&mut heap, &clock_permits(), LockdownConfig::default())
            .expect("lockdown runs");
        let entries = outcome
            .report
            .entries
            .iter()
            .map(|entry| (entry.severity, entry.status.clone(), entry.path.clone()))
            .collect();
        let names = heap.own_property_names(heap.global()).expect("names");
        (entries, names, outcome.report.ok)
    }

    let quiet = run();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(std::io::sink)
        .finish();
    let loud = tracing::subscriber::with_default(subscriber, run);
    assert_eq!(quiet, loud);
}

#[test]
fn unenumerable_survivor_aborts_the_defense_sweep() {
    let mut heap = Heap::new();
    let global = heap.global();
    let shifty = heap.alloc_plain();
    heap.set(shifty, "lurker", Value::Num(1.0)).expect("set lurker");
    heap.set_quirks(shifty, Quirks::ENUMERATION_FAILS);
    heap.set(global, "shifty", Value::Obj(shifty)).expect("set shifty");

    let permits = Permit::subtree([("shifty", Permit::subtree([]))]);
    match lockdown(&mut heap, &permits, LockdownConfig::default()) {
        Err(LockdownError::DefenseFailed { path, .. }) => assert_eq!(path, "<root>.shifty"),
        Err(other) => panic!("unexpected failure: {other:?}"),
        Ok(outcome) => {
            panic!("expected an abort, got report:\n{}", outcome.report.render_human())
        }
    }
    assert!(heap.has_own(shifty, "lurker"), "nothing may pretend the member was handled");
}
