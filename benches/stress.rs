use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, Utc};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let password = std::env::var("INNKEEP_PASSWORD").unwrap_or_else(|_| "innkeep".into());
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("innkeep")
        .user("bench")
        .password(password);

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// First bookable night, far enough out that no stay lands in the past.
fn base_date() -> NaiveDate {
    Utc::now().date_naive() + Days::new(30)
}

fn night(offset: u64) -> (NaiveDate, NaiveDate) {
    let start = base_date() + Days::new(offset);
    (start, start + Days::new(1))
}

fn insert_stay(room: &str, check_in: NaiveDate, check_out: NaiveDate) -> String {
    format!(
        "INSERT INTO reservations (room_id, check_in, check_out, guest_name, guest_email) \
         VALUES ('{room}', '{check_in}', '{check_out}', 'Bench Guest', 'bench@example.com')"
    )
}

async fn add_room(client: &tokio_postgres::Client, room_type: &str) -> String {
    let room = format!("bench-{}", Ulid::new());
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, room_type) VALUES ('{room}', '{room_type}')"
        ))
        .await
        .unwrap();
    room
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let room = add_room(&client, "bench-seq").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let (check_in, check_out) = night(i as u64);
        let t = Instant::now();
        client
            .simple_query(&insert_stay(&room, check_in, check_out))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} admissions in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("admission latency", &mut latencies);
}

/// Every task races for the same nights on one room; each night admits once.
async fn phase2_contention(host: &str, port: u16) {
    let n_tasks = 20;
    let nights = 100;

    let setup = connect(host, port).await;
    let room = add_room(&setup, "bench-contention").await;
    drop(setup);

    let admitted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let room = room.clone();
        let admitted = admitted.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for i in 0..nights {
                let (check_in, check_out) = night(i);
                match client
                    .simple_query(&insert_stay(&room, check_in, check_out))
                    .await
                {
                    Ok(_) => admitted.fetch_add(1, Ordering::Relaxed),
                    Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let admitted = admitted.load(Ordering::Relaxed);
    let rejected = rejected.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {nights} nights: {admitted} admitted, {rejected} rejected in {:.2}s",
        elapsed.as_secs_f64()
    );
    if admitted as u64 != nights {
        println!("  !! expected exactly {nights} admissions");
    }
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let room_type = format!("bench-read-{}", Ulid::new());

    let setup = connect(host, port).await;
    let mut rooms = Vec::new();
    for _ in 0..10 {
        rooms.push(add_room(&setup, &room_type).await);
    }
    for (r, room) in rooms.iter().enumerate() {
        for i in 0..20u64 {
            let (check_in, check_out) = night(i * 3 + r as u64);
            setup
                .simple_query(&insert_stay(room, check_in, check_out))
                .await
                .unwrap();
        }
    }
    drop(setup);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for room in rooms.iter().take(5).cloned() {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut i = 100u64;
            while !stop.load(Ordering::Relaxed) {
                let (check_in, check_out) = night(i);
                let _ = client
                    .simple_query(&insert_stay(&room, check_in, check_out))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let from = base_date();
    let to = from + Days::new(180);
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        let room_type = room_type.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        r#"SELECT * FROM calendar WHERE room_type = '{room_type}' AND start >= '{from}' AND "end" <= '{to}'"#
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("calendar query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = add_room(&client, "bench-storm").await;
            for i in 0..ops_per_conn {
                let (check_in, check_out) = night(i);
                client
                    .simple_query(&insert_stay(&room, check_in, check_out))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("INNKEEP_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("INNKEEP_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid INNKEEP_PORT");

    println!("=== innkeep stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase registers its own rooms so phases never collide.

    println!("[phase 1] sequential admission throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contention on one room");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] calendar latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
