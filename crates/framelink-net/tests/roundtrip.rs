//! End-to-end behavior over real loopback sockets.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framelink_net::{Connection, Listener};
use tokio::sync::mpsc;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[tokio::test]
async fn server_receives_exact_bytes_then_teardown_disconnects_client() {
    let listener = Listener::new();
    let (data_tx, mut data_rx) = mpsc::unbounded_channel();
    let data_count = Arc::new(AtomicUsize::new(0));
    {
        let count = Arc::clone(&data_count);
        listener.on_data(move |message| {
            count.fetch_add(1, Ordering::SeqCst);
            data_tx.send(message.into_payload()).unwrap();
        });
    }
    let addr = listener.start_ephemeral(LOCALHOST).await.unwrap();

    let client = Connection::connect(addr, Duration::from_secs(1))
        .await
        .unwrap();
    let (gone_tx, mut gone_rx) = mpsc::unbounded_channel();
    client.on_disconnect(move |_| {
        gone_tx.send(()).unwrap();
    });

    client.send(&[0x01u8, 0x02, 0x03]).await.unwrap();

    let received = data_rx.recv().await.unwrap();
    assert_eq!(received.as_ref(), &[0x01, 0x02, 0x03]);

    listener.dispose().await;
    gone_rx.recv().await.unwrap();

    // No further data notifications after the disconnect.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(data_count.load(Ordering::SeqCst), 1);
    assert!(!client.is_open());
    assert!(!listener.is_running());
}

#[tokio::test]
async fn many_clients_fifo_per_connection() {
    let listener = Listener::new();
    // Echo each payload back on its own connection.
    listener.on_data(|message| {
        tokio::spawn(async move {
            let payload = message.payload().clone();
            let _ = message.reply(payload).await;
        });
    });
    let addr = listener.start_ephemeral(LOCALHOST).await.unwrap();

    let mut tasks = Vec::new();
    for client_idx in 0..8u8 {
        tasks.push(tokio::spawn(async move {
            let client = Connection::connect(addr, Duration::from_secs(1))
                .await
                .unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();
            client.on_data(move |message| {
                tx.send(message.into_payload()).unwrap();
            });

            for seq in 0..50u32 {
                let mut payload = vec![client_idx];
                payload.extend_from_slice(&seq.to_le_bytes());
                client.send(payload).await.unwrap();
            }
            // Echoes come back in the order sent, per connection.
            for seq in 0..50u32 {
                let echoed = rx.recv().await.unwrap();
                assert_eq!(echoed[0], client_idx);
                assert_eq!(&echoed[1..], seq.to_le_bytes());
            }
            client.dispose().await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    listener.dispose().await;
}

#[tokio::test]
async fn messages_from_distinct_connections_are_all_delivered() {
    let listener = Listener::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    listener.on_data(move |message| {
        tx.send(message.connection().id()).unwrap();
    });
    let addr = listener.start_ephemeral(LOCALHOST).await.unwrap();

    let first = Connection::connect(addr, Duration::from_secs(1))
        .await
        .unwrap();
    let second = Connection::connect(addr, Duration::from_secs(1))
        .await
        .unwrap();

    first.send(b"from-first").await.unwrap();
    second.send(b"from-second").await.unwrap();

    let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 2, "messages from two distinct connections");

    listener.dispose().await;
}
