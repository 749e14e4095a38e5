use std::net::SocketAddr;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};

use innkeep::engine::{AdmissionSettings, Engine, ManualClock};
use innkeep::store::{MemoryStore, ReservationStore};
use innkeep::wire;

const PASSWORD: &str = "innkeep";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<ManualClock>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let clock = Arc::new(ManualClock::at_date(
        NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
    ));
    let store: Arc<dyn ReservationStore> = Arc::new(MemoryStore::new());
    let engine = Arc::new(
        Engine::open(store, AdmissionSettings::default(), clock.clone())
            .await
            .unwrap(),
    );

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, PASSWORD.to_string(), None).await;
            });
        }
    });

    (addr, clock)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("innkeep")
        .user("frontdesk")
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client
        .simple_query(sql)
        .await
        .expect_err("statement should fail");
    err.code()
        .map(|c| c.code().to_string())
        .unwrap_or_else(|| panic!("no SQLSTATE on error: {err}"))
}

fn insert_reservation(room: &str, check_in: &str, check_out: &str) -> String {
    format!(
        "INSERT INTO reservations (room_id, check_in, check_out, guest_name, guest_email) \
         VALUES ('{room}', '{check_in}', '{check_out}', 'Ada Lovelace', 'ada@example.com')"
    )
}

async fn reserve(client: &Client, room: &str, check_in: &str, check_out: &str) -> String {
    let result = rows(client, &insert_reservation(room, check_in, check_out)).await;
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].get("status"), Some("pending"));
    assert!(result[0].get("hold_expires_at").is_some());
    result[0].get("id").unwrap().to_string()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn june_booking_flow() {
    let (addr, _clock) = start_test_server().await;
    let client = connect(addr).await;

    client
        .batch_execute("INSERT INTO rooms (id, room_type) VALUES ('R101', 'Double')")
        .await
        .unwrap();

    let a = reserve(&client, "R101", "2025-06-01", "2025-06-05").await;

    let code = sqlstate(&client, &insert_reservation("R101", "2025-06-04", "2025-06-06")).await;
    assert_eq!(code, "23P01");

    client
        .batch_execute(&format!(
            "UPDATE reservations SET status = 'confirmed' WHERE id = '{a}'"
        ))
        .await
        .unwrap();

    // Checkout day is free for the next check-in.
    reserve(&client, "R101", "2025-06-05", "2025-06-08").await;

    let found = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{a}'")).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("status"), Some("confirmed"));
    assert_eq!(found[0].get("check_in"), Some("2025-06-01"));
    assert_eq!(found[0].get("hold_expires_at"), None);
    let guest: serde_json::Value = serde_json::from_str(found[0].get("guest").unwrap()).unwrap();
    assert_eq!(guest["email"], "ada@example.com");

    let active = rows(&client, "SELECT * FROM reservations WHERE room_id = 'R101'").await;
    assert_eq!(active.len(), 2);
    assert_eq!(active[0].get("check_in"), Some("2025-06-01"));
    assert_eq!(active[1].get("status"), Some("pending"));
}

#[tokio::test]
async fn guest_cancel_frees_dates() {
    let (addr, _clock) = start_test_server().await;
    let client = connect(addr).await;
    client
        .batch_execute("INSERT INTO rooms (id, room_type) VALUES ('R1', 'Single')")
        .await
        .unwrap();

    let id = reserve(&client, "R1", "2025-06-10", "2025-06-12").await;
    let available = "SELECT * FROM availability WHERE room_id = 'R1' \
                     AND check_in = '2025-06-11' AND check_out = '2025-06-13'";
    assert_eq!(rows(&client, available).await[0].get("available"), Some("f"));

    client
        .batch_execute(&format!("DELETE FROM reservations WHERE id = '{id}'"))
        .await
        .unwrap();
    // Cancelling again is a no-op.
    client
        .batch_execute(&format!("DELETE FROM reservations WHERE id = '{id}'"))
        .await
        .unwrap();

    assert_eq!(rows(&client, available).await[0].get("available"), Some("t"));
    let found = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    assert_eq!(found[0].get("status"), Some("cancelled"));
    assert_eq!(found[0].get("cancelled_by"), Some("guest"));
}

#[tokio::test]
async fn admin_cancel_records_actor() {
    let (addr, _clock) = start_test_server().await;
    let client = connect(addr).await;
    client
        .batch_execute("INSERT INTO rooms (id, room_type) VALUES ('R1', 'Single')")
        .await
        .unwrap();

    let id = reserve(&client, "R1", "2025-06-10", "2025-06-12").await;
    client
        .batch_execute(&format!(
            "UPDATE reservations SET status = 'cancelled', cancelled_by = 'payment' WHERE id = '{id}'"
        ))
        .await
        .unwrap();

    let found = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    assert_eq!(found[0].get("cancelled_by"), Some("payment"));
}

#[tokio::test]
async fn room_type_calendar_views() {
    let (addr, _clock) = start_test_server().await;
    let client = connect(addr).await;
    client
        .batch_execute(
            "INSERT INTO rooms (id, room_type) VALUES ('D1', 'Double'), ('D2', 'Double'), ('S1', 'Suite')",
        )
        .await
        .unwrap();

    reserve(&client, "D1", "2025-06-01", "2025-06-05").await;
    reserve(&client, "D2", "2025-06-03", "2025-06-07").await;

    let window = "room_type = 'Double' AND start >= '2025-06-01' AND \"end\" <= '2025-07-01'";

    let calendar = rows(&client, &format!("SELECT * FROM calendar WHERE {window}")).await;
    assert_eq!(calendar.len(), 1);
    assert_eq!(calendar[0].get("start"), Some("2025-06-01"));
    assert_eq!(calendar[0].get("end"), Some("2025-06-07"));

    let blocked = rows(&client, &format!("SELECT * FROM blocked_dates WHERE {window}")).await;
    assert_eq!(blocked.len(), 2);
    assert_eq!(blocked[0].get("room_id"), Some("D1"));

    let sold_out = rows(&client, &format!("SELECT * FROM sold_out WHERE {window}")).await;
    assert_eq!(sold_out.len(), 1);
    assert_eq!(sold_out[0].get("start"), Some("2025-06-03"));
    assert_eq!(sold_out[0].get("end"), Some("2025-06-05"));

    let free = rows(
        &client,
        "SELECT * FROM free_dates WHERE room_id = 'D1' AND start >= '2025-06-01' AND \"end\" <= '2025-06-15'",
    )
    .await;
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].get("start"), Some("2025-06-05"));

    let doubles = rows(&client, "SELECT * FROM rooms WHERE room_type = 'Double'").await;
    assert_eq!(doubles.len(), 2);
    assert_eq!(rows(&client, "SELECT * FROM rooms").await.len(), 3);

    let code = sqlstate(
        &client,
        "SELECT * FROM calendar WHERE room_type = 'Loft' AND start >= '2025-06-01' AND \"end\" <= '2025-07-01'",
    )
    .await;
    assert_eq!(code, "P0002");
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let (addr, _clock) = start_test_server().await;
    let client = connect(addr).await;
    client
        .batch_execute("INSERT INTO rooms (id, room_type) VALUES ('R1', 'Double')")
        .await
        .unwrap();

    assert_eq!(
        sqlstate(&client, &insert_reservation("R9", "2025-06-01", "2025-06-05")).await,
        "P0002"
    );
    assert_eq!(
        sqlstate(&client, &insert_reservation("R1", "2025-06-05", "2025-06-01")).await,
        "22008"
    );
    assert_eq!(
        sqlstate(&client, &insert_reservation("R1", "2025-04-01", "2025-04-03")).await,
        "22008"
    );
    assert_eq!(sqlstate(&client, "SELEKT nothing").await, "42601");
    assert_eq!(
        sqlstate(&client, "INSERT INTO rooms (id, room_type) VALUES ('R1', 'Suite')").await,
        "23505"
    );
    // A clash anywhere in a multi-row insert registers none of the rows.
    assert_eq!(
        sqlstate(
            &client,
            "INSERT INTO rooms (id, room_type) VALUES ('R2', 'Double'), ('R1', 'Suite')"
        )
        .await,
        "23505"
    );
    assert_eq!(rows(&client, "SELECT * FROM rooms").await.len(), 1);

    let id = reserve(&client, "R1", "2025-06-01", "2025-06-05").await;
    let confirm = format!("UPDATE reservations SET status = 'confirmed' WHERE id = '{id}'");
    client.batch_execute(&confirm).await.unwrap();
    assert_eq!(sqlstate(&client, &confirm).await, "55000");

    assert_eq!(
        sqlstate(
            &client,
            "UPDATE reservations SET status = 'confirmed' WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'"
        )
        .await,
        "P0002"
    );
}

#[tokio::test]
async fn idempotency_key_over_wire() {
    let (addr, _clock) = start_test_server().await;
    let client = connect(addr).await;
    client
        .batch_execute("INSERT INTO rooms (id, room_type) VALUES ('R1', 'Double')")
        .await
        .unwrap();

    let with_key = |check_out: &str| {
        format!(
            "INSERT INTO reservations (room_id, check_in, check_out, guest_name, guest_email, idempotency_key) \
             VALUES ('R1', '2025-06-01', '{check_out}', 'Ada', 'ada@example.com', 'cart-42')"
        )
    };

    let first = rows(&client, &with_key("2025-06-05")).await;
    let again = rows(&client, &with_key("2025-06-05")).await;
    assert_eq!(first[0].get("id"), again[0].get("id"));

    assert_eq!(sqlstate(&client, &with_key("2025-06-06")).await, "23505");
}

#[tokio::test]
async fn stale_hold_gives_way() {
    let (addr, clock) = start_test_server().await;
    let client = connect(addr).await;
    client
        .batch_execute("INSERT INTO rooms (id, room_type) VALUES ('R1', 'Double')")
        .await
        .unwrap();

    let stale = reserve(&client, "R1", "2025-06-01", "2025-06-05").await;
    clock.advance(16 * 60_000);

    reserve(&client, "R1", "2025-06-03", "2025-06-06").await;

    let found = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{stale}'")).await;
    assert_eq!(found[0].get("status"), Some("expired"));
    assert_eq!(
        sqlstate(
            &client,
            &format!("UPDATE reservations SET status = 'confirmed' WHERE id = '{stale}'")
        )
        .await,
        "55000"
    );
}

#[tokio::test]
async fn extended_protocol_binds_params() {
    let (addr, _clock) = start_test_server().await;
    let client = connect(addr).await;
    client
        .execute(
            "INSERT INTO rooms (id, room_type) VALUES ($1, $2)",
            &[&"R7", &"Twin"],
        )
        .await
        .unwrap();

    let admitted = client
        .query(
            "INSERT INTO reservations (room_id, check_in, check_out, guest_name, guest_email) \
             VALUES ($1, $2, $3, $4, $5)",
            &[&"R7", &"2025-06-01", &"2025-06-03", &"O'Brien", &"ob@example.com"],
        )
        .await
        .unwrap();
    assert_eq!(admitted.len(), 1);
    let id: &str = admitted[0].get("id");
    let status: &str = admitted[0].get("status");
    assert_eq!(status, "pending");

    let rooms = client
        .query("SELECT * FROM rooms WHERE room_type = $1", &[&"Twin"])
        .await
        .unwrap();
    assert_eq!(rooms.len(), 1);
    let room_id: &str = rooms[0].get("id");
    assert_eq!(room_id, "R7");

    let found = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    let guest: serde_json::Value = serde_json::from_str(found[0].get("guest").unwrap()).unwrap();
    assert_eq!(guest["name"], "O'Brien");

    // Placeholder text inside a bound value stays literal.
    let admitted = client
        .query(
            "INSERT INTO reservations (room_id, check_in, check_out, guest_name, guest_email) \
             VALUES ($1, $2, $3, $4, $5)",
            &[&"R7", &"2025-06-10", &"2025-06-12", &"Suite $1 fan", &"fan@example.com"],
        )
        .await
        .unwrap();
    let id: &str = admitted[0].get("id");
    let found = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    let guest: serde_json::Value = serde_json::from_str(found[0].get("guest").unwrap()).unwrap();
    assert_eq!(guest["name"], "Suite $1 fan");
    assert_eq!(found[0].get("room_id"), Some("R7"));
}

#[tokio::test]
async fn concurrent_clients_one_winner() {
    let (addr, _clock) = start_test_server().await;
    let setup = connect(addr).await;
    setup
        .batch_execute("INSERT INTO rooms (id, room_type) VALUES ('R1', 'Double')")
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        handles.push(tokio::spawn(async move {
            let client = connect(addr).await;
            client
                .simple_query(&insert_reservation("R1", "2025-07-01", "2025-07-04"))
                .await
                .is_ok()
        }));
    }

    let mut admitted = 0;
    for h in handles {
        if h.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(
        rows(&setup, "SELECT * FROM reservations WHERE room_id = 'R1'").await.len(),
        1
    );
}
