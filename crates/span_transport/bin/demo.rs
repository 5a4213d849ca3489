//! # UDP Span Transport Demo
//!
//! Generates a burst of spans with random payload sizes, sends them through a
//! [`Transport`] and reports how they were packed into datagrams.
//!
//! Without `--agent`, a local agent socket is bound on loopback and a thread
//! counts the datagrams it receives, so the demo runs standalone.
//!
//! ## Running
//!
//! ```bash
//! # Local loopback agent, 1000 spans
//! cargo run -p span_transport --bin demo --release
//!
//! # Quick mode (100 spans), macOS-sized packets, with transport logs
//! RUST_LOG=span_transport=debug cargo run -p span_transport --bin demo -- --quick --packet 9216
//!
//! # Send to a real agent
//! cargo run -p span_transport --bin demo -- --agent localhost:6831
//! ```

use rand::Rng;
use span_transport::{Span, Tag, TraceBuffer, Transport, TransportConfig};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const OPERATIONS: &[&str] = &[
    "GET /api/cart",
    "POST /api/checkout",
    "db.query",
    "cache.get",
    "grpc.Inventory/Reserve",
    "kafka.publish",
];

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Counts datagrams arriving at a loopback socket until told to stop
struct LocalAgent {
    addr: String,
    datagrams: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
    largest: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl LocalAgent {
    fn start() -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.set_read_timeout(Some(Duration::from_millis(50)))?;
        let addr = socket.local_addr()?.to_string();

        let datagrams = Arc::new(AtomicU64::new(0));
        let bytes = Arc::new(AtomicU64::new(0));
        let largest = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let (d, b, l, s) = (
            Arc::clone(&datagrams),
            Arc::clone(&bytes),
            Arc::clone(&largest),
            Arc::clone(&stop),
        );
        let handle = thread::spawn(move || {
            let mut buf = vec![0u8; 65536];
            while !s.load(Ordering::Relaxed) {
                if let Ok((len, _)) = socket.recv_from(&mut buf) {
                    d.fetch_add(1, Ordering::Relaxed);
                    b.fetch_add(len as u64, Ordering::Relaxed);
                    l.fetch_max(len as u64, Ordering::Relaxed);
                }
            }
        });

        Ok(Self {
            addr,
            datagrams,
            bytes,
            largest,
            stop,
            handle,
        })
    }

    fn stop(self) -> (u64, u64, u64) {
        // Let in-flight datagrams land
        thread::sleep(Duration::from_millis(200));
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.handle.join();
        (
            self.datagrams.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
            self.largest.load(Ordering::Relaxed),
        )
    }
}

fn generate(buffer: &mut TraceBuffer, count: usize, rng: &mut impl Rng) {
    let trace_id: u128 = rng.gen();
    let mut parent = 0u64;

    for i in 0..count {
        let span_id = i as u64 + 1;
        let op = OPERATIONS[rng.gen_range(0..OPERATIONS.len())];
        let mut span = Span::new(trace_id, span_id, parent, op)
            .with_tag("span.kind", if i % 2 == 0 { "server" } else { "client" })
            .with_tag("payload.size", rng.gen_range(0..4096i64));

        // A few spans carry a large payload; one in a hundred is too big for any datagram
        let payload = match rng.gen_range(0..100) {
            0 => 70_000,
            1..=9 => rng.gen_range(1_000..8_000),
            _ => rng.gen_range(0..200),
        };
        span.set_tag("payload", "x".repeat(payload));

        if rng.gen_bool(0.1) {
            span.set_tag("error", true);
            span.log(vec![Tag::new("event", "error"), Tag::new("message", "upstream timeout")]);
        }
        span.duration = rng.gen_range(10..50_000);
        buffer.push(span);

        // 80% of spans are children of the previous one
        parent = if rng.gen_bool(0.8) { span_id } else { 0 };
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    let quick = args.contains(&"--quick".to_string());
    let span_count = if quick { 100 } else { 1000 };
    let packet_size = arg_value(&args, "--packet")
        .map(|p| p.parse::<usize>())
        .transpose()?
        .unwrap_or(0);

    let (agent, local) = match arg_value(&args, "--agent") {
        Some(addr) => (addr, None),
        None => {
            let local = LocalAgent::start()?;
            (local.addr.clone(), Some(local))
        }
    };

    println!("=== UDP Span Transport Demo ===\n");
    let config = TransportConfig::default()
        .with_agent_host_port(agent)
        .with_max_packet_size(packet_size);
    let mut transport = Transport::new(config)?;
    println!("  Agent:           {}", transport.agent_host_port());
    println!("  Max packet size: {} bytes", transport.max_batch_bytes().packet_size());
    println!("  Span budget:     {} bytes", transport.max_batch_bytes().get());
    println!("  Spans:           {}\n", span_count);

    let mut buffer = TraceBuffer::new("demo-service")
        .with_process_tag("hostname", "demo-host")
        .with_process_tag("client-uuid", format!("{:016x}", rand::thread_rng().gen::<u64>()));
    generate(&mut buffer, span_count, &mut rand::thread_rng());

    let start = Instant::now();
    let summary = transport.append(&buffer);
    let elapsed = start.elapsed();
    transport.close();

    println!("=== Append Summary ===");
    println!("  Spans sent:        {}", summary.spans_sent);
    println!("  Datagrams sent:    {}", summary.batches_sent);
    println!("  Oversized dropped: {}", summary.oversized_dropped);
    println!("  Encode failures:   {}", summary.encode_failures);
    println!("  Send failures:     {}", summary.send_failures);
    println!("  Elapsed:           {:?}", elapsed);

    let metrics = transport.metrics();
    if metrics.batches_sent > 0 {
        let budget = transport.max_batch_bytes().get() as f64;
        let avg = metrics.bytes_sent as f64 / metrics.batches_sent as f64;
        println!("  Avg utilization:   {:.1}%", avg / budget * 100.0);
    }

    if let Some(local) = local {
        let (datagrams, bytes, largest) = local.stop();
        println!("\n=== Local Agent ===");
        println!("  Datagrams received: {}", datagrams);
        println!("  Bytes received:     {}", bytes);
        println!("  Largest datagram:   {} bytes", largest);
    }

    Ok(())
}
