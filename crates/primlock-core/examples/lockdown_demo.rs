//! Lockdown walkthrough.
//!
//! Builds a world holding a small `clock` capability, locks it down so
//! that only `clock.now` survives, and then runs confined programs
//! against the result.
//!
//! Usage:
//!   cargo run --example lockdown_demo
//!   RUST_LOG=primlock=trace cargo run --example lockdown_demo

use anyhow::Result;
use primlock_core::{lockdown, LockdownConfig, Permit};
use primlock_heap::{Heap, Value};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();

    let mut heap = Heap::new();
    let global = heap.global();
    let clock = heap.alloc_plain();
    let now = heap.alloc_native("now", |_, _, _| Ok(Value::Num(1_724_310_000.0)));
    let secret = heap.alloc_native("secret", |_, _, _| Ok(Value::str("do not leak")));
    heap.set(clock, "now", Value::Obj(now))?;
    heap.set(clock, "secret", Value::Obj(secret))?;
    heap.set(global, "clock", Value::Obj(clock))?;

    let permits = Permit::subtree([("clock", Permit::subtree([("now", Permit::AllowAsIs)]))]);
    let outcome = lockdown(&mut heap, &permits, LockdownConfig::default())?;
    print!("{}", outcome.report.render_human());
    if !outcome.report.ok {
        anyhow::bail!("environment is not safe to use");
    }

    let vat = outcome.vat;
    println!();
    println!("confine(\"clock.now()\")      -> {:?}", vat.confine(&mut heap, "clock.now()", None)?);
    println!(
        "confine(\"clock.secret()\")   -> {:?}",
        vat.confine(&mut heap, "clock.secret()", None).map_err(|e| e.to_string())
    );
    println!(
        "confine(\"typeof clock.secret\") -> {:?}",
        vat.confine(&mut heap, "typeof clock.secret", None)?
    );

    let compiled = vat.compile_expr(&mut heap, "x + 1")?;
    for seed in [41.0, 0.0] {
        let imports = vat.make_imports(&mut heap)?;
        heap.set(imports, "x", Value::Num(seed))?;
        println!("x + 1 with x = {seed:>4} -> {:?}", compiled.call(&mut heap, imports)?);
    }

    println!("vat.Nat(7) from inside  -> {:?}", vat.confine(&mut heap, "vat.Nat(7)", None)?);
    Ok(())
}
