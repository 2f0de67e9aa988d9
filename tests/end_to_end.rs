//! End-to-end scenarios from the design's §8 "Concrete end-to-end
//! scenarios": hello relay over a bound IPC pair, switch default
//! broadcast, a per-port hook suppressing that broadcast, and a loopback
//! round trip. Each test owns its own thread (the default for `cargo
//! test`), so the thread-local broker state never leaks between them.
//!
//! GPIO (§8 scenario 4) and I2C (§8 scenario 5) round trips need real
//! kernel devices this test environment does not have; their wire-layout
//! guarantees are covered instead by the unit tests in
//! `src/payload.rs` and `src/kinds/{gpio,i2c}.rs`.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Pumps `epfabric::dispatch` in short bursts until `done` reports true or
/// a generous number of rounds elapses, so tests don't depend on exactly
/// how many reactor wakeups accepting a connection and relaying one frame
/// happen to take.
fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        epfabric::dispatch(Some(Duration::from_millis(5))).unwrap();
        if done() {
            return;
        }
    }
    assert!(done(), "condition did not settle after polling the reactor");
}

/// Unconditionally pumps a few dispatch rounds, used to let the reactor
/// accept a just-established client connection before the test goes on to
/// exercise it.
fn pump(rounds: usize) {
    for _ in 0..rounds {
        epfabric::dispatch(Some(Duration::from_millis(5))).unwrap();
    }
}

fn unique_name(case: &str) -> String {
    format!(
        "epfabric-test-{case}-{}-{}",
        std::process::id(),
        case.len() + case.as_bytes().iter().map(|b| *b as usize).sum::<usize>()
    )
}

#[test]
fn hello_relay_over_a_bound_ipc_pair() {
    epfabric::init().unwrap();

    let addr_a = format!("ipc://@{}", unique_name("hello-a"));
    let addr_b = format!("ipc://@{}", unique_name("hello-b"));
    let a = epfabric::open(&addr_a).unwrap();
    let b = epfabric::open(&addr_b).unwrap();
    epfabric::bind(a, b).unwrap();

    let received = Rc::new(RefCell::new(Vec::new()));
    let received_cb = received.clone();
    let ctx_b = epfabric::connect(&addr_b).unwrap();
    epfabric::setcb(
        ctx_b,
        Some(Box::new(move |_ctx, payload: &[u8]| {
            received_cb.borrow_mut().push(payload.to_vec());
        })),
        None,
        0,
    )
    .unwrap();
    pump(10);

    let ctx_a = epfabric::connect(&addr_a).unwrap();
    pump(10);

    epfabric::send(ctx_a, b"foo").unwrap();
    settle(|| !received.borrow().is_empty());

    assert_eq!(received.borrow().as_slice(), &[b"foo".to_vec()]);

    epfabric::close(a);
    epfabric::close(b);
    epfabric::shutdown();
}

#[test]
fn empty_payload_delivers_once_with_zero_length() {
    epfabric::init().unwrap();

    let addr_a = format!("ipc://@{}", unique_name("empty-a"));
    let addr_b = format!("ipc://@{}", unique_name("empty-b"));
    let a = epfabric::open(&addr_a).unwrap();
    let b = epfabric::open(&addr_b).unwrap();
    epfabric::bind(a, b).unwrap();

    let received = Rc::new(RefCell::new(Vec::new()));
    let received_cb = received.clone();
    let ctx_b = epfabric::connect(&addr_b).unwrap();
    epfabric::setcb(
        ctx_b,
        Some(Box::new(move |_ctx, payload: &[u8]| {
            received_cb.borrow_mut().push(payload.to_vec());
        })),
        None,
        0,
    )
    .unwrap();
    let ctx_a = epfabric::connect(&addr_a).unwrap();
    pump(10);

    epfabric::send(ctx_a, b"").unwrap();
    settle(|| !received.borrow().is_empty());

    assert_eq!(received.borrow().as_slice(), &[Vec::<u8>::new()]);

    epfabric::close(a);
    epfabric::close(b);
    epfabric::shutdown();
}

#[test]
fn switch_default_broadcasts_to_every_other_port() {
    epfabric::init().unwrap();

    let sw = epfabric::switch_create().unwrap();
    let p1 = epfabric::port(sw, "p1").unwrap();
    let p2 = epfabric::port(sw, "p2").unwrap();
    let p3 = epfabric::port(sw, "p3").unwrap();

    let addr1 = format!("ipc://@{}", unique_name("bcast-c1"));
    let addr2 = format!("ipc://@{}", unique_name("bcast-c2"));
    let addr3 = format!("ipc://@{}", unique_name("bcast-c3"));
    let ipc1 = epfabric::open(&addr1).unwrap();
    let ipc2 = epfabric::open(&addr2).unwrap();
    let ipc3 = epfabric::open(&addr3).unwrap();
    epfabric::bind(p1, ipc1).unwrap();
    epfabric::bind(p2, ipc2).unwrap();
    epfabric::bind(p3, ipc3).unwrap();

    let recv1 = Rc::new(RefCell::new(Vec::new()));
    let recv2 = Rc::new(RefCell::new(Vec::new()));
    let recv3 = Rc::new(RefCell::new(Vec::new()));
    let ctx1 = epfabric::connect(&addr1).unwrap();
    let ctx2 = epfabric::connect(&addr2).unwrap();
    let ctx3 = epfabric::connect(&addr3).unwrap();
    for (ctx, recv) in [(ctx1, recv1.clone()), (ctx2, recv2.clone()), (ctx3, recv3.clone())] {
        epfabric::setcb(
            ctx,
            Some(Box::new(move |_ctx, payload: &[u8]| {
                recv.borrow_mut().push(payload.to_vec());
            })),
            None,
            0,
        )
        .unwrap();
    }
    pump(10);

    epfabric::send(ctx1, b"hi").unwrap();
    settle(|| !recv2.borrow().is_empty() && !recv3.borrow().is_empty());

    assert_eq!(recv2.borrow().as_slice(), &[b"hi".to_vec()]);
    assert_eq!(recv3.borrow().as_slice(), &[b"hi".to_vec()]);
    assert!(recv1.borrow().is_empty(), "the sender's own port must not echo back");

    epfabric::close(ipc1);
    epfabric::close(ipc2);
    epfabric::close(ipc3);
    epfabric::shutdown();
}

#[test]
fn per_port_hook_suppresses_default_broadcast_and_can_fan_out_itself() {
    epfabric::init().unwrap();

    let sw = epfabric::switch_create().unwrap();
    let p1 = epfabric::port(sw, "p1").unwrap();
    let p2 = epfabric::port(sw, "p2").unwrap();
    let p3 = epfabric::port(sw, "p3").unwrap();

    let addr1 = format!("ipc://@{}", unique_name("hook-c1"));
    let addr2 = format!("ipc://@{}", unique_name("hook-c2"));
    let addr3 = format!("ipc://@{}", unique_name("hook-c3"));
    let ipc1 = epfabric::open(&addr1).unwrap();
    let ipc2 = epfabric::open(&addr2).unwrap();
    let ipc3 = epfabric::open(&addr3).unwrap();
    epfabric::bind(p1, ipc1).unwrap();
    epfabric::bind(p2, ipc2).unwrap();
    epfabric::bind(p3, ipc3).unwrap();

    epfabric::port_setcb(
        sw,
        "p1",
        Box::new(move |registry, payload| {
            let upper: Vec<u8> = payload.to_ascii_uppercase();
            let _ = registry.inject(p2, &upper);
            let _ = registry.inject(p3, &upper);
        }),
    )
    .unwrap();

    let recv1 = Rc::new(RefCell::new(Vec::new()));
    let recv2 = Rc::new(RefCell::new(Vec::new()));
    let recv3 = Rc::new(RefCell::new(Vec::new()));
    let ctx1 = epfabric::connect(&addr1).unwrap();
    let ctx2 = epfabric::connect(&addr2).unwrap();
    let ctx3 = epfabric::connect(&addr3).unwrap();
    for (ctx, recv) in [(ctx1, recv1.clone()), (ctx2, recv2.clone()), (ctx3, recv3.clone())] {
        epfabric::setcb(
            ctx,
            Some(Box::new(move |_ctx, payload: &[u8]| {
                recv.borrow_mut().push(payload.to_vec());
            })),
            None,
            0,
        )
        .unwrap();
    }
    pump(10);

    epfabric::send(ctx1, b"hello").unwrap();
    settle(|| !recv2.borrow().is_empty() && !recv3.borrow().is_empty());

    assert_eq!(recv2.borrow().as_slice(), &[b"HELLO".to_vec()]);
    assert_eq!(recv3.borrow().as_slice(), &[b"HELLO".to_vec()]);
    assert!(recv1.borrow().is_empty());

    epfabric::close(ipc1);
    epfabric::close(ipc2);
    epfabric::close(ipc3);
    epfabric::shutdown();
}

#[test]
fn loopback_round_trip_both_directions() {
    epfabric::init().unwrap();

    let lo = unique_name("lo");
    let lo_descriptor = epfabric::open(&lo).unwrap();
    let addr = format!("ipc://@{}", unique_name("lo-client"));
    let ipc = epfabric::open(&addr).unwrap();
    epfabric::bind(lo_descriptor, ipc).unwrap();

    let from_loopback = Rc::new(RefCell::new(Vec::new()));
    let from_loopback_cb = from_loopback.clone();
    let ctx = epfabric::connect(&addr).unwrap();
    epfabric::setcb(
        ctx,
        Some(Box::new(move |_ctx, payload: &[u8]| {
            from_loopback_cb.borrow_mut().push(payload.to_vec());
        })),
        None,
        0,
    )
    .unwrap();
    pump(10);

    // process -> bound IPC client.
    epfabric::loopback_xfer(&lo, b"ping").unwrap();
    settle(|| !from_loopback.borrow().is_empty());
    assert_eq!(from_loopback.borrow().as_slice(), &[b"ping".to_vec()]);

    // IPC client -> process, via the registered loopback callback.
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_cb = seen.clone();
    let lo_for_cb = lo.clone();
    epfabric::loopback_setcb(
        &lo,
        Box::new(move |name, payload| {
            assert_eq!(name, lo_for_cb);
            seen_cb.borrow_mut().push(payload.to_vec());
        }),
    )
    .unwrap();

    epfabric::send(ctx, b"pong").unwrap();
    settle(|| !seen.borrow().is_empty());
    assert_eq!(seen.borrow().as_slice(), &[b"pong".to_vec()]);

    epfabric::close(ipc);
    epfabric::close(lo_descriptor);
    epfabric::shutdown();
}
