use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::DuplexStream;
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use timetable::clock::FixedClock;
use timetable::engine::Scheduler;
use timetable::ledger::MemoryLedger;
use timetable::store::MemoryStore;
use timetable::wire::{self, Response};

// ── Test infrastructure ──────────────────────────────────────

struct Session {
    framed: Framed<DuplexStream, LinesCodec>,
}

impl Session {
    async fn call(&mut self, command: Value) -> Response {
        self.framed.send(command.to_string()).await.unwrap();
        self.read().await
    }

    async fn send_raw(&mut self, line: &str) -> Response {
        self.framed.send(line.to_string()).await.unwrap();
        self.read().await
    }

    async fn read(&mut self) -> Response {
        let line = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("response timed out")
            .expect("stream closed")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }
}

fn start_session(store: Arc<MemoryStore>) -> Session {
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2023, 1, 1, 9, 0, 0).unwrap(), Tz::UTC);
    let scheduler = Arc::new(
        Scheduler::new(store, Arc::new(clock))
            .with_ledger(Arc::new(MemoryLedger::new()))
            .with_batch_size(2),
    );

    let (client, server) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(server);
    tokio::spawn(async move {
        let _ = wire::process_stream(reader, writer, scheduler).await;
    });

    Session {
        framed: Framed::new(client, LinesCodec::new()),
    }
}

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("timetable_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn booking(date: &str, start: &str, end: &str, location: &str, instructor: &str) -> Value {
    json!({
        "date": date,
        "startTime": start,
        "endTime": end,
        "location": location,
        "instructorId": instructor,
    })
}

fn wednesday_series() -> Value {
    json!({
        "location": "Hall-1",
        "instructorId": "inst-1",
        "startDate": "2023-01-01",
        "endDate": "2023-01-31",
        "dayOfWeek": 3,
        "startTime": "10:00",
        "endTime": "11:00",
    })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn series_lifecycle() {
    let mut s = start_session(Arc::new(MemoryStore::new()));

    let preview = s.call(json!({ "op": "validate_series", "series": wednesday_series() })).await;
    assert_eq!(preview.status, 200);
    assert_eq!(preview.body["hasConflicts"], false);
    assert_eq!(
        preview.body["occurrenceDates"],
        json!(["2023-01-04", "2023-01-11", "2023-01-18", "2023-01-25"])
    );

    let created = s.call(json!({ "op": "schedule_series", "series": wednesday_series() })).await;
    assert_eq!(created.status, 201);
    assert_eq!(created.code, "committed");
    assert_eq!(created.body["insertedCount"], 4);
    assert_eq!(created.body["bookingIds"].as_array().unwrap().len(), 4);
    assert_eq!(created.body["cancelled"], false);

    // Same instructor in another room, overlapping the 18th.
    let clash = s
        .call(json!({
            "op": "schedule_single",
            "booking": booking("2023-01-18", "10:30", "11:30", "Hall-2", "inst-1"),
        }))
        .await;
    assert_eq!(clash.status, 409);
    assert_eq!(clash.code, "conflict_detected");
    assert_eq!(clash.body["roomConflicts"], json!([]));
    assert_eq!(clash.body["instructorConflicts"][0]["kind"], "instructor");
    assert_eq!(clash.body["instructorConflicts"][0]["location"], "Hall-1");

    // Adjacent slot is free.
    let after = s
        .call(json!({
            "op": "schedule_single",
            "booking": booking("2023-01-18", "11:00", "12:00", "Hall-1", "inst-2"),
        }))
        .await;
    assert_eq!(after.status, 201);
}

#[tokio::test]
async fn forced_series_reports_skipped_slot() {
    let mut s = start_session(Arc::new(MemoryStore::new()));
    let taken = s
        .call(json!({
            "op": "schedule_single",
            "booking": booking("2023-01-11", "10:00", "11:00", "Hall-1", "inst-9"),
        }))
        .await;
    assert_eq!(taken.status, 201);

    let rejected = s.call(json!({ "op": "schedule_series", "series": wednesday_series() })).await;
    assert_eq!(rejected.status, 409);
    assert_eq!(rejected.body["roomConflicts"][0]["date"], "2023-01-11");

    let forced = s
        .call(json!({ "op": "schedule_series", "series": wednesday_series(), "force": true }))
        .await;
    assert_eq!(forced.status, 201);
    assert_eq!(forced.body["insertedCount"], 3);
    let skipped = &forced.body["skipped"][0];
    assert_eq!(skipped["date"], "2023-01-11");
    assert_eq!(skipped["reason"], "duplicate");
    assert_eq!(skipped["slot"]["kind"], "room");
}

#[tokio::test]
async fn update_and_cancel() {
    let mut s = start_session(Arc::new(MemoryStore::new()));
    let created = s
        .call(json!({
            "op": "schedule_single",
            "booking": booking("2023-02-01", "09:00", "10:00", "Lab-3", "inst-1"),
        }))
        .await;
    let id = created.body["id"].as_str().unwrap().to_string();

    let moved = s
        .call(json!({
            "op": "update_booking",
            "id": id,
            "booking": booking("2023-02-01", "09:30", "10:30", "Lab-3", "inst-1"),
        }))
        .await;
    assert_eq!(moved.status, 200);
    assert_eq!(moved.body["id"], id.as_str());
    assert_eq!(moved.body["startTime"], "09:30");

    let cancelled = s.call(json!({ "op": "cancel_booking", "id": id })).await;
    assert_eq!(cancelled.status, 200);
    assert_eq!(cancelled.code, "cancelled");

    let again = s.call(json!({ "op": "cancel_booking", "id": id })).await;
    assert_eq!(again.status, 404);
}

#[tokio::test]
async fn bad_lines_do_not_end_the_session() {
    let mut s = start_session(Arc::new(MemoryStore::new()));

    let garbage = s.send_raw("SELECT * FROM bookings").await;
    assert_eq!(garbage.status, 400);
    assert_eq!(garbage.code, "invalid_command");

    let mut bad_range = wednesday_series();
    bad_range["endDate"] = json!("2022-12-01");
    let range = s.call(json!({ "op": "validate_series", "series": bad_range })).await;
    assert_eq!(range.status, 400);
    assert_eq!(range.code, "invalid_date_range");

    let mut bad_day = wednesday_series();
    bad_day["dayOfWeek"] = json!(9);
    assert_eq!(s.call(json!({ "op": "validate_series", "series": bad_day })).await.code, "invalid_weekday");

    let ok = s.call(json!({ "op": "validate_series", "series": wednesday_series() })).await;
    assert_eq!(ok.status, 200);
}

#[tokio::test]
async fn journaled_bookings_survive_restart() {
    let path = temp_dir().join("bookings.journal");

    {
        let store = Arc::new(MemoryStore::open(path.clone()).unwrap());
        let mut s = start_session(store);
        let created = s.call(json!({ "op": "schedule_series", "series": wednesday_series() })).await;
        assert_eq!(created.body["insertedCount"], 4);
    }

    let store = Arc::new(MemoryStore::open(path).unwrap());
    assert_eq!(store.len(), 4);
    let mut s = start_session(store);
    let again = s.call(json!({ "op": "schedule_series", "series": wednesday_series() })).await;
    assert_eq!(again.status, 409);
    assert_eq!(again.body["roomConflicts"].as_array().unwrap().len(), 4);
}
