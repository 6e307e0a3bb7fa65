use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, Weekday};
use ulid::Ulid;

use timetable::clock::SystemClock;
use timetable::engine::Scheduler;
use timetable::model::{CandidateOccurrence, Decision, Rejection, SeriesRequest, TimeOfDay, TimeWindow};
use timetable::store::{BookingStore, MemoryStore};

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
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn base_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
}

fn hour_window(hour: u16) -> TimeWindow {
    TimeWindow::new(
        TimeOfDay::from_minutes(hour * 60).unwrap(),
        TimeOfDay::from_minutes(hour * 60 + 60).unwrap(),
    )
    .unwrap()
}

fn open_store() -> Arc<MemoryStore> {
    match std::env::var("TIMETABLE_BENCH_DATA_DIR") {
        Ok(dir) => {
            let dir = std::path::PathBuf::from(dir).join(format!("bench_{}", Ulid::new()));
            std::fs::create_dir_all(&dir).unwrap();
            Arc::new(MemoryStore::open(dir.join("bookings.journal")).unwrap())
        }
        Err(_) => Arc::new(MemoryStore::new()),
    }
}

fn scheduler(store: Arc<MemoryStore>) -> Arc<Scheduler> {
    Arc::new(Scheduler::new(store, Arc::new(SystemClock::default())))
}

async fn phase1_sequential() {
    let s = scheduler(open_store());
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let date = base_day() + Days::new((i / 12) as u64);
        let hour = 8 + (i % 12) as u16;
        let candidate = CandidateOccurrence::new(date, hour_window(hour), "Hall-1", "inst-1");
        let t = Instant::now();
        let decision = s.schedule_single(candidate, false).await.unwrap();
        latencies.push(t.elapsed());
        assert!(decision.is_committed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("schedule_single", &mut latencies);
}

async fn phase2_series() {
    let s = scheduler(open_store());
    let n_rooms = 40;
    let mut latencies = Vec::with_capacity(n_rooms);
    let start = Instant::now();
    let mut inserted = 0;

    for room in 0..n_rooms {
        let request = SeriesRequest {
            location: format!("Room-{room}"),
            instructor_id: format!("inst-{room}"),
            start_date: base_day(),
            end_date: base_day() + Days::new(364),
            weekday: Weekday::Tue,
            window: hour_window(10),
            exclude_dates: BTreeSet::new(),
        };
        let t = Instant::now();
        let outcome = s.schedule_series(&request, false).await.unwrap().committed().unwrap();
        latencies.push(t.elapsed());
        inserted += outcome.inserted_count;
    }

    let elapsed = start.elapsed();
    println!(
        "  {n_rooms} yearly series, {inserted} occurrences in {:.2}s",
        elapsed.as_secs_f64()
    );
    print_latency("schedule_series", &mut latencies);
}

#[derive(Default)]
struct Tally {
    committed: usize,
    preflight: usize,
    late: usize,
    duplicate: usize,
}

async fn phase3_contention() {
    let store = open_store();
    let s = scheduler(store.clone());
    let n_tasks = 16;
    let n_slots = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let s = s.clone();
        handles.push(tokio::spawn(async move {
            let mut tally = Tally::default();
            let mut latencies = Vec::with_capacity(n_slots);
            for slot in 0..n_slots {
                // Every task walks the same slots, offset so they collide mid-flight.
                let slot = (slot + task * 7) % n_slots;
                let date = base_day() + Days::new((slot / 10) as u64);
                let hour = 8 + (slot % 10) as u16;
                let candidate =
                    CandidateOccurrence::new(date, hour_window(hour), "Hall-1", format!("inst-{task}"));
                let t = Instant::now();
                match s.schedule_single(candidate, false).await.unwrap() {
                    Decision::Committed(_) => tally.committed += 1,
                    Decision::Rejected(Rejection::Conflicts(_)) => tally.preflight += 1,
                    Decision::Rejected(Rejection::LateConflicts(_)) => tally.late += 1,
                    Decision::Rejected(Rejection::Duplicate(_)) => tally.duplicate += 1,
                }
                latencies.push(t.elapsed());
            }
            (tally, latencies)
        }));
    }

    let mut total = Tally::default();
    let mut latencies = Vec::new();
    for h in handles {
        let (tally, mut l) = h.await.unwrap();
        total.committed += tally.committed;
        total.preflight += tally.preflight;
        total.late += tally.late;
        total.duplicate += tally.duplicate;
        latencies.append(&mut l);
    }

    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} tasks x {n_slots} slots in {:.2}s: committed={}, preflight={}, late={}, duplicate={}",
        elapsed.as_secs_f64(),
        total.committed,
        total.preflight,
        total.late,
        total.duplicate,
    );
    assert_eq!(total.committed, n_slots, "each slot must have exactly one winner");
    assert_eq!(store.len(), n_slots);
    print_latency("contended schedule_single", &mut latencies);
}

async fn phase4_validate_under_load() {
    let store = open_store();
    let s = scheduler(store.clone());

    let writer = {
        let s = s.clone();
        tokio::spawn(async move {
            for i in 0..5000usize {
                let date = base_day() + Days::new((i / 12) as u64);
                let hour = 8 + (i % 12) as u16;
                let candidate = CandidateOccurrence::new(date, hour_window(hour), format!("Room-{}", i % 7), "inst-w");
                let _ = s.schedule_single(candidate, true).await;
            }
        })
    };

    let mut latencies = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline && !writer.is_finished() {
        let check = CandidateOccurrence::new(base_day(), hour_window(9), "Room-0", "inst-reader");
        let t = Instant::now();
        s.validate_single(&check, None).await.unwrap();
        latencies.push(t.elapsed());
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();

    let written = store.find_candidates(base_day(), timetable::store::ResourceRef::Instructor("inst-w"), None).await.unwrap();
    println!("  {} validations while writing, {} bookings on day one", latencies.len(), written.len());
    print_latency("validate_single", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== timetable stress benchmark ===");
    match std::env::var("TIMETABLE_BENCH_DATA_DIR") {
        Ok(dir) => println!("store: journaled under {dir}\n"),
        Err(_) => println!("store: volatile\n"),
    }

    println!("[phase 1] sequential single bookings");
    phase1_sequential().await;

    println!("\n[phase 2] yearly weekly series");
    phase2_series().await;

    println!("\n[phase 3] contended slots");
    phase3_contention().await;

    println!("\n[phase 4] validation latency under write load");
    phase4_validate_under_load().await;

    println!("\n=== benchmark complete ===");
}
