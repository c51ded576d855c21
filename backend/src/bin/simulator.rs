use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::json;
use std::env;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `--safe` presses "I'M SAFE" a few seconds into the countdown
    let press_safe = env::args().any(|arg| arg == "--safe");
    let url = Url::parse("ws://127.0.0.1:8080/ws")?;

    println!("Connecting to CrashGuard server...");
    let (ws_stream, _) = connect_async(url.to_string()).await?;
    let (mut write, mut read) = ws_stream.split();

    // Print whatever the session publishes
    tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(text) = msg {
                println!("<- {}", text);
            }
        }
    });

    let mut t: i64 = 1_700_000_000_000;

    // 1. Normal driving: gravity plus a little road noise
    for i in 1..=10 {
        t += 100;
        send(&mut write, json!({ "kind": "gyroscope", "x": 0.05, "y": 0.1, "z": 0.02, "t": t })).await?;
        send(&mut write, json!({ "kind": "accelerometer", "x": 0.3, "y": 0.4, "z": 9.8, "t": t })).await?;
        println!("Sending normal data... ({}/10)", i);
        sleep(Duration::from_millis(100)).await;
    }

    // 2. Crash: violent spin with sustained hard deceleration
    println!("SIMULATING CRASH!");
    for _ in 0..6 {
        t += 50;
        send(&mut write, json!({ "kind": "gyroscope", "x": 2.5, "y": 2.8, "z": 0.4, "t": t })).await?;
        send(&mut write, json!({ "kind": "accelerometer", "x": 24.5, "y": 12.0, "z": 9.8, "t": t })).await?;
        sleep(Duration::from_millis(50)).await;
    }

    if press_safe {
        sleep(Duration::from_secs(3)).await;
        println!("Pressing I'M SAFE");
        send(&mut write, json!({ "action": "USER_SAFE" })).await?;
        sleep(Duration::from_secs(2)).await;
    } else {
        // Let the countdown run out
        sleep(Duration::from_secs(35)).await;
    }

    println!("Simulation finished.");
    Ok(())
}

async fn send<S>(write: &mut S, packet: serde_json::Value) -> anyhow::Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    write.send(Message::Text(packet.to_string().into())).await?;
    Ok(())
}
