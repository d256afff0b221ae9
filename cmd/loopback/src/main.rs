//! Loopback ping-pong
//!
//! Two endpoints of an in-memory connection bounce messages back and forth.
//! Endpoint A runs a poller with a worker pool; endpoint B runs a hybrid
//! poll-executor. Every echo is a continuation posting the next send.
//!
//! Environment:
//! - `CQD_ITERATIONS` - round trips (default 100000)
//! - `CQD_MSG_SIZE` - message length in bytes (default 64)
//! - `CQD_ARENA_SLOTS` - in-flight operation slots (default 65536)
//! - plus every `CQD_*` variable read by the configs

use cqdispatch::prelude::*;
use cqdispatch::{constants, cqd_error, cqd_info, env_get, init_logging};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Keep a receive posted on `side`; every arrival runs `on_msg` and re-arms.
fn arm_recv<F>(arena: &Arc<OperationArena>, side: &LoopbackTransport, len: u32, on_msg: Arc<F>) -> DispatchResult<()>
where
    F: Fn(u32) + Send + Sync + 'static,
{
    let arena2 = Arc::clone(arena);
    let side2 = side.clone();
    arena.post_with(side, WorkRequest::recv(len), move |event| {
        let (n, _) = event.recv_result();
        on_msg(n);
        if let Err(e) = arm_recv(&arena2, &side2, len, Arc::clone(&on_msg)) {
            cqd_error!("re-arm failed: {}", e);
        }
    })?;
    Ok(())
}

fn run() -> DispatchResult<()> {
    init_logging();
    let iterations: u64 = env_get("CQD_ITERATIONS", 100_000);
    let msg_size: u32 = env_get("CQD_MSG_SIZE", 64);

    println!("=== cqdispatch loopback ping-pong ===\n");
    println!("Iterations: {}", iterations);
    println!("Message:    {} bytes\n", msg_size);

    let (a, b) = LoopbackTransport::pair();
    let slots: usize = env_get("CQD_ARENA_SLOTS", constants::DEFAULT_ARENA_SLOTS);
    let arena = Arc::new(OperationArena::new(slots)?);

    let poller = Poller::new(vec![a.recv_cq()], Arc::clone(&arena), PollerConfig::from_env().name("ping-poller"))?;
    let hybrid = HybridPollExecutor::new(
        vec![b.send_cq()],
        vec![b.recv_cq()],
        Arc::clone(&arena),
        HybridConfig::from_env().name("pong-hybrid"),
    )?;
    poller.connect_done();
    hybrid.connect_done();
    hybrid.enable_listening();

    let done = Arc::new(AtomicU64::new(0));

    // B echoes every message back unsignaled
    let echo_side = b.clone();
    arm_recv(&arena, &b, msg_size, Arc::new(move |n: u32| {
        if let Err(e) = echo_side.post(WorkRequest::send(n).unsignaled()) {
            cqd_error!("echo failed: {}", e);
        }
    }))?;

    // A counts the echo and sends the next ping
    let ping_side = a.clone();
    let counter = Arc::clone(&done);
    arm_recv(&arena, &a, msg_size, Arc::new(move |n: u32| {
        if counter.fetch_add(1, Ordering::AcqRel) + 1 < iterations {
            if let Err(e) = ping_side.post(WorkRequest::send(n).unsignaled()) {
                cqd_error!("ping failed: {}", e);
            }
        }
    }))?;

    let start = Instant::now();
    a.post(WorkRequest::send(msg_size).unsignaled())?;

    while done.load(Ordering::Acquire) < iterations {
        if start.elapsed() > Duration::from_secs(60) {
            println!("Timeout! Only {}/{} round trips", done.load(Ordering::Acquire), iterations);
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let elapsed = start.elapsed();
    let completed = done.load(Ordering::Acquire);

    let ps = poller.stats();
    let hs = hybrid.stats();
    println!("=== Results ===");
    println!("Round trips:  {}", completed);
    println!("Time:         {:?}", elapsed);
    println!("Rate:         {:.0} round trips/sec", completed as f64 / elapsed.as_secs_f64());
    println!("Avg RTT:      {:.2} us", elapsed.as_secs_f64() * 1e6 / completed.max(1) as f64);
    println!();
    println!("{}: polled {} dispatched {} resumed inline {} stale {}",
        poller.name(), ps.polled, ps.dispatched, ps.resumed, ps.stale);
    if let Some(exec) = poller.executor() {
        let es = exec.stats();
        println!("{}: resumed {} panicked {} queued {}", exec.name(), es.resumed, es.panicked, es.queued);
    }
    println!("{}: polled {} resumed {} drained {}",
        hybrid.name(), hs.polled, hs.resumed, hs.drained);
    cqd_info!("loopback done, {} operations still in flight", arena.in_flight());
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("loopback: {}", e);
        std::process::exit(1);
    }
}
