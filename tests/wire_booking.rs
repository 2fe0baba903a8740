use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Config, NoTls, Notification, SimpleQueryMessage};
use ulid::Ulid;

use salond::clock::SalonClock;
use salond::tenant::TenantManager;
use salond::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("salond_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000, SalonClock::default()));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "salond".to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(
    addr: SocketAddr,
    db: &str,
) -> (
    tokio_postgres::Client,
    mpsc::UnboundedReceiver<Notification>,
) {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user("salond")
        .password("salond");

    let (client, mut connection) = config.connect(NoTls).await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let stream = stream::poll_fn(move |cx| connection.poll_message(cx));
        futures::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(AsyncMessage::Notification(n)) => {
                    let _ = tx.send(n);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    (client, rx)
}

/// Data rows of a simple query, each as a column-name → value map.
async fn query_rows(
    client: &tokio_postgres::Client,
    sql: &str,
) -> Vec<Vec<(String, Option<String>)>> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(i, col)| (col.name().to_string(), row.get(i).map(str::to_string)))
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

fn column<'a>(row: &'a [(String, Option<String>)], name: &str) -> Option<&'a str> {
    row.iter()
        .find(|(col, _)| col == name)
        .and_then(|(_, value)| value.as_deref())
}

async fn book(client: &tokio_postgres::Client, date: &str, time: &str) -> String {
    let rows = query_rows(
        client,
        &format!(
            "INSERT INTO appointments (date, start_time, duration, service, full_name, email) \
             VALUES ('{date}', '{time}', 60, 'Haircut', 'Ana Silva', 'ana@example.com')"
        ),
    )
    .await;
    assert_eq!(rows.len(), 1);
    column(&rows[0], "id").unwrap().to_string()
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<String> {
    err.as_db_error().map(|e| e.code().code().to_string())
}

// 2030-01-07 is a Monday.
const MONDAY: &str = "2030-01-07";

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_round_trip() {
    let addr = start_test_server().await;
    let (client, _rx) = connect(addr, "round_trip").await;

    let slots = query_rows(&client, &format!("SELECT * FROM available_slots WHERE date = '{MONDAY}'")).await;
    assert_eq!(slots.len(), 9);
    assert_eq!(column(&slots[0], "slot"), Some("09:00"));

    let id = book(&client, MONDAY, "10:00").await;

    let slots = query_rows(&client, &format!("SELECT * FROM available_slots WHERE date = '{MONDAY}'")).await;
    assert_eq!(slots.len(), 8);
    assert!(slots.iter().all(|row| column(row, "slot") != Some("10:00")));

    let listed = query_rows(&client, &format!("SELECT * FROM appointments WHERE id = '{id}'")).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(column(&listed[0], "date"), Some(MONDAY));
    assert_eq!(column(&listed[0], "end_time"), Some("11:00"));
    assert_eq!(column(&listed[0], "phone"), None);

    client
        .batch_execute(&format!("UPDATE appointments SET start_time = '14:00' WHERE id = '{id}'"))
        .await
        .unwrap();
    let listed = query_rows(&client, &format!("SELECT * FROM appointments WHERE date = '{MONDAY}'")).await;
    assert_eq!(column(&listed[0], "start_time"), Some("14:00"));

    client
        .batch_execute(&format!("DELETE FROM appointments WHERE id = '{id}'"))
        .await
        .unwrap();
    let err = client
        .batch_execute(&format!("DELETE FROM appointments WHERE id = '{id}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("P0002"));
}

#[tokio::test]
async fn overlap_reports_exclusion_violation() {
    let addr = start_test_server().await;
    let (client, _rx) = connect(addr, "overlap").await;

    book(&client, MONDAY, "10:00").await;
    let err = client
        .simple_query(&format!(
            "INSERT INTO appointments (date, start_time, duration, full_name) \
             VALUES ('{MONDAY}', '10:30', 60, 'Bea Costa')"
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("23P01"));

    let err = client
        .simple_query("SELECT * FROM stylists")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("42601"));
}

#[tokio::test]
async fn rejected_update_leaves_appointment_in_place() {
    let addr = start_test_server().await;
    let (client, _rx) = connect(addr, "rejected_update").await;

    let id = book(&client, MONDAY, "10:00").await;
    let err = client
        .batch_execute(&format!(
            "UPDATE appointments SET start_time = '14:00', email = 'not-an-email' WHERE id = '{id}'"
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("22023"));

    let listed = query_rows(&client, &format!("SELECT * FROM appointments WHERE id = '{id}'")).await;
    assert_eq!(column(&listed[0], "start_time"), Some("10:00"));
    assert_eq!(column(&listed[0], "email"), Some("ana@example.com"));

    let err = client
        .batch_execute(&format!(
            "INSERT INTO appointments (date, start_time, duration, full_name) \
             VALUES ('{MONDAY}', '23:30', 60, 'Bea Costa')"
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("22023"));
}

#[tokio::test]
async fn closed_override_over_the_wire() {
    let addr = start_test_server().await;
    let (client, _rx) = connect(addr, "override").await;

    client
        .batch_execute(&format!("INSERT INTO date_overrides (date, open, close) VALUES ('{MONDAY}', NULL, NULL)"))
        .await
        .unwrap();
    let rows = query_rows(&client, &format!("SELECT * FROM bookable_dates WHERE date = '{MONDAY}'")).await;
    assert_eq!(column(&rows[0], "bookable"), Some("f"));

    let overrides = query_rows(&client, "SELECT * FROM date_overrides").await;
    assert_eq!(overrides.len(), 1);
    assert_eq!(column(&overrides[0], "open"), None);

    client
        .batch_execute(&format!("DELETE FROM date_overrides WHERE date = '{MONDAY}'"))
        .await
        .unwrap();
    let rows = query_rows(&client, &format!("SELECT * FROM bookable_dates WHERE date = '{MONDAY}'")).await;
    assert_eq!(column(&rows[0], "bookable"), Some("t"));
}

#[tokio::test]
async fn schedule_reads_back() {
    let addr = start_test_server().await;
    let (client, _rx) = connect(addr, "schedule").await;

    client.batch_execute("UPDATE schedule SET slot_duration = 30").await.unwrap();
    let schedule = query_rows(&client, "SELECT * FROM schedule").await;
    assert_eq!(column(&schedule[0], "slot_duration"), Some("30"));
    assert_eq!(column(&schedule[0], "timezone"), Some("UTC"));

    let week = query_rows(&client, "SELECT * FROM weekly_hours").await;
    assert_eq!(week.len(), 7);
    assert_eq!(column(&week[0], "open"), None);
    assert_eq!(column(&week[1], "open"), Some("09:00"));
    assert_eq!(column(&week[6], "close"), Some("16:00"));
}

#[tokio::test]
async fn databases_are_separate_salons() {
    let addr = start_test_server().await;
    let (salon_a, _) = connect(addr, "salon_a").await;
    let (salon_b, _) = connect(addr, "salon_b").await;

    book(&salon_a, MONDAY, "10:00").await;
    assert_eq!(query_rows(&salon_a, "SELECT * FROM appointments").await.len(), 1);
    assert!(query_rows(&salon_b, "SELECT * FROM appointments").await.is_empty());
}

#[tokio::test]
async fn listener_receives_booking_notice() {
    let addr = start_test_server().await;
    let (listener, mut rx) = connect(addr, "notices").await;
    listener.batch_execute("LISTEN appointments").await.unwrap();

    let (booker, _) = connect(addr, "notices").await;
    let id = book(&booker, MONDAY, "10:00").await;

    // Pending notices ride along with the listener's next statement.
    listener.batch_execute("SELECT * FROM schedule").await.unwrap();
    let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .ok()
        .flatten()
        .expect("expected notification");
    assert_eq!(notification.channel(), "appointments");

    let payload: serde_json::Value = serde_json::from_str(notification.payload()).unwrap();
    assert_eq!(payload["kind"], "booked");
    assert_eq!(payload["id"], id);
    assert_eq!(payload["date"], MONDAY);
    assert_eq!(payload["time"], "10:00");
    assert_eq!(payload["customer"]["email"], "ana@example.com");
}

#[tokio::test]
async fn unlisten_stops_notices() {
    let addr = start_test_server().await;
    let (listener, mut rx) = connect(addr, "unlisten").await;
    listener.batch_execute("LISTEN appointments").await.unwrap();
    listener.batch_execute("UNLISTEN *").await.unwrap();

    let (booker, _) = connect(addr, "unlisten").await;
    book(&booker, MONDAY, "10:00").await;

    listener.batch_execute("SELECT * FROM schedule").await.unwrap();
    let notification = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(notification.is_err() || notification.unwrap().is_none());
}

#[tokio::test]
async fn listen_rejects_unknown_channel() {
    let addr = start_test_server().await;
    let (client, _) = connect(addr, "bad_channel").await;
    let err = client.batch_execute("LISTEN resource_x").await.unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("22023"));
}
