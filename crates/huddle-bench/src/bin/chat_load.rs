//! End-to-end load generator for Huddle.
//!
//! Connects a crowd of chat clients to a running server, joins them all,
//! and measures how many `receive_message` events per second reach them.
//!
//! ```bash
//! huddle --port 5000 &
//! chat_load 32 ws://127.0.0.1:5000/ws
//! ```

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use huddle_protocol::{ClientEvent, ServerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const DEFAULT_URL: &str = "ws://127.0.0.1:5000/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
/// Pause between messages from one client.
const SEND_INTERVAL: Duration = Duration::from_millis(10);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sender = SplitSink<Socket, Message>;
type Receiver = SplitStream<Socket>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("Huddle chat load: {} clients against {}", num_clients, url);
    println!("Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let received = Arc::new(AtomicU64::new(0));
    let sent = Arc::new(AtomicU64::new(0));
    let joined = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let url = url.clone();
        let received = Arc::clone(&received);
        let sent = Arc::clone(&sent);
        let joined = Arc::clone(&joined);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            if let Some((sender, receiver)) = admit(client_id, url, joined, barrier).await {
                if let Err(e) = chat(client_id, sender, receiver, received, sent).await {
                    eprintln!("Client {} error: {}", client_id, e);
                }
            }
        }));
    }

    barrier.wait().await;
    let joined = joined.load(Ordering::SeqCst);
    println!("{} of {} clients joined", joined, num_clients);
    if joined == 0 {
        return;
    }

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    sent.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let total_received = received.load(Ordering::SeqCst);
    let total_sent = sent.load(Ordering::SeqCst);

    println!();
    println!("Clients:          {:>10}", num_clients);
    println!("Duration:         {:>10.2}s", elapsed);
    println!("Messages sent:    {:>10}", total_sent);
    println!("Deliveries:       {:>10}", total_received);
    println!("Send rate:        {:>10.0} msg/s", total_sent as f64 / elapsed);
    println!("Delivery rate:    {:>10.0} msg/s", total_received as f64 / elapsed);
    if total_sent > 0 {
        println!(
            "Fan-out ratio:    {:>10.2}",
            total_received as f64 / total_sent as f64
        );
    }

    for handle in handles {
        handle.abort();
    }
}

/// Join the room, then wait at the barrier whether or not joining worked.
async fn admit(
    client_id: usize,
    url: String,
    joined: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Option<(Sender, Receiver)> {
    let room = tokio::time::timeout(JOIN_TIMEOUT, join_room(client_id, &url))
        .await
        .unwrap_or_else(|_| Err("timed out joining".into()));
    if room.is_ok() {
        joined.fetch_add(1, Ordering::SeqCst);
    }

    // Failed clients still release the barrier.
    barrier.wait().await;

    match room {
        Ok(room) => Some(room),
        Err(e) => {
            eprintln!("Client {} failed to join: {}", client_id, e);
            None
        }
    }
}

/// Connect, wait for the greeting, and join the room.
async fn join_room(client_id: usize, url: &str) -> Result<(Sender, Receiver), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // The server registers the connection before greeting it.
    match next_event(&mut receiver).await? {
        Some(ServerEvent::Connected { .. }) => {}
        other => return Err(format!("expected connected, got {:?}", other).into()),
    }

    let join = serde_json::to_string(&ClientEvent::join(format!("load-{}", client_id)))?;
    sender.send(Message::Text(join)).await?;
    Ok((sender, receiver))
}

async fn chat(
    client_id: usize,
    mut sender: Sender,
    mut receiver: Receiver,
    received: Arc<AtomicU64>,
    sent: Arc<AtomicU64>,
) -> Result<(), BoxError> {
    let recv_task = tokio::spawn(async move {
        while let Ok(Some(event)) = next_event(&mut receiver).await {
            if matches!(event, ServerEvent::ReceiveMessage(_)) {
                received.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    let body = serde_json::to_string(&ClientEvent::send_message(format!(
        "hello from load-{}",
        client_id
    )))?;
    let mut ticker = tokio::time::interval(SEND_INTERVAL);
    loop {
        ticker.tick().await;
        if sender.send(Message::Text(body.clone())).await.is_err() {
            break;
        }
        sent.fetch_add(1, Ordering::Relaxed);
    }

    recv_task.abort();
    Ok(())
}

async fn next_event<S>(receiver: &mut S) -> Result<Option<ServerEvent>, BoxError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = receiver.next().await {
        match message? {
            Message::Text(text) => return Ok(Some(serde_json::from_str(&text)?)),
            Message::Close(_) => return Ok(None),
            _ => continue,
        }
    }
    Ok(None)
}
