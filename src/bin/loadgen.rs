//! Synthetic load client for the matchbook HTTP API.
//!
//! Generates random limit orders and posts them from concurrent senders,
//! either spread across a wide price band (`mixed`) or deliberately crossing
//! around a base price (`crossing`), then prints a latency summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use clap::Parser;
use hdrhistogram::Histogram;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server base URL
    #[arg(short, long, default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Number of concurrent senders
    #[arg(short, long, default_value = "8")]
    concurrency: usize,

    /// Orders per wave
    #[arg(short, long, default_value = "100")]
    orders: usize,

    /// Duration of the run in seconds
    #[arg(short, long, default_value = "30")]
    duration: u64,

    /// Pause between waves in milliseconds
    #[arg(short, long, default_value = "50")]
    pause_ms: u64,

    /// Order generation mode: "mixed" or "crossing"
    #[arg(short, long, default_value = "crossing")]
    mode: String,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    /// Uniform prices in 90..110, random side.
    Mixed,
    /// Buys above and sells below a 100 base, so most orders cross.
    Crossing,
}

#[derive(Debug, Clone, serde::Serialize)]
struct OrderPayload {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "Type")]
    side: &'static str,
    #[serde(rename = "Price")]
    price: f64,
    #[serde(rename = "Amount")]
    amount: i64,
}

fn generate_wave(mode: Mode, start_id: i64, n: usize) -> Vec<OrderPayload> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|i| {
            let buy = rng.gen_bool(0.5);
            let price = match mode {
                Mode::Mixed => 90.0 + rng.gen::<f64>() * 20.0,
                Mode::Crossing => {
                    if buy {
                        100.0 + rng.gen::<f64>() * 5.0
                    } else {
                        100.0 - rng.gen::<f64>() * 5.0
                    }
                }
            };
            OrderPayload {
                id: start_id + i as i64,
                side: if buy { "BUY" } else { "SELL" },
                price,
                amount: rng.gen_range(1..=10),
            }
        })
        .collect()
}

async fn send_wave(
    client: &reqwest::Client,
    url: &str,
    orders: Vec<OrderPayload>,
    concurrency: usize,
    hist: &Arc<Mutex<Histogram<u64>>>,
    sent: &Arc<AtomicU64>,
    errors: &Arc<AtomicU64>,
) {
    if orders.is_empty() {
        return;
    }
    let per_sender = orders.len().div_ceil(concurrency.max(1));
    let mut handles = Vec::new();
    for chunk in orders.chunks(per_sender) {
        let chunk = chunk.to_vec();
        let client = client.clone();
        let url = url.to_string();
        let hist = hist.clone();
        let sent = sent.clone();
        let errors = errors.clone();
        handles.push(tokio::spawn(async move {
            for order in chunk {
                let started = Instant::now();
                let res = client.post(url.as_str()).json(&order).send().await;
                let elapsed_us = started.elapsed().as_micros() as u64;
                match res {
                    Ok(resp) if resp.status() == reqwest::StatusCode::CREATED => {
                        sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(resp) => {
                        errors.fetch_add(1, Ordering::Relaxed);
                        eprintln!("[loadgen] unexpected status {} for order {}", resp.status(), order.id);
                    }
                    Err(e) => {
                        errors.fetch_add(1, Ordering::Relaxed);
                        eprintln!("[loadgen] request failed: {e}");
                    }
                }
                hist.lock().await.record(elapsed_us.max(1)).ok();
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mode = match args.mode.as_str() {
        "mixed" => Mode::Mixed,
        "crossing" => Mode::Crossing,
        other => return Err(anyhow!("mode must be \"mixed\" or \"crossing\", got {other:?}")),
    };
    if args.orders == 0 {
        return Err(anyhow!("orders per wave must be positive"));
    }

    let url = format!("{}/orders", args.server.trim_end_matches('/'));
    let client = reqwest::Client::new();
    let hist = Arc::new(Mutex::new(
        Histogram::<u64>::new(3).map_err(|e| anyhow!("histogram: {e}"))?,
    ));
    let sent = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));

    let started = Instant::now();
    let mut next_id: i64 = 1;
    while started.elapsed() < Duration::from_secs(args.duration) {
        let wave = generate_wave(mode, next_id, args.orders);
        next_id += wave.len() as i64;
        send_wave(&client, &url, wave, args.concurrency, &hist, &sent, &errors).await;
        sleep(Duration::from_millis(args.pause_ms)).await;
    }

    let hist = hist.lock().await;
    println!(
        "sent={} errors={} elapsed={:.1}s p50_us={} p99_us={} max_us={}",
        sent.load(Ordering::Relaxed),
        errors.load(Ordering::Relaxed),
        started.elapsed().as_secs_f64(),
        hist.value_at_quantile(0.5),
        hist.value_at_quantile(0.99),
        hist.max()
    );
    Ok(())
}
