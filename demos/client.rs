//! Minimal interactive client, mirroring the original library's own
//! `examples/client.rs`: connect, alternate between printing whatever the
//! server sends and sending a random string on a timer, and close cleanly
//! after a handful of round trips.

use futures::StreamExt;
use tokio::select;
use tokio::time::{interval, Duration};
use wsengine::connect::{connect_async, Event};

async fn handle_connection(addr: &str) {
    match connect_async(addr).await {
        Ok(mut ws) => {
            let mut ticker = interval(Duration::from_secs(5));
            let mut counter = 0;

            loop {
                select! {
                    event = ws.next() => {
                        match event {
                            Some(Ok(Event::Text(text))) => {
                                println!("received message: {text}");
                                counter += 1;
                                if counter >= 3 {
                                    if ws.close(1000, "done").await.is_err() {
                                        eprintln!("error occurred when closing connection");
                                    }
                                    break;
                                }
                            }
                            Some(Ok(Event::Close { code, reason })) => {
                                println!("server closed the connection: {code:?} {reason:?}");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                eprintln!("received error from the stream: {err}");
                                break;
                            }
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        let random_string = generate_random_string();
                        if ws.send_text(&random_string).await.is_err() {
                            eprintln!("failed to send message");
                            break;
                        }
                    }
                }
            }
        }
        Err(err) => eprintln!("error when performing handshake: {err}"),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    handle_connection("ws://127.0.0.1:9002").await;
}

fn generate_random_string() -> String {
    (0..30)
        .map(|_| {
            const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
            CHARSET[rand::random::<usize>() % CHARSET.len()] as char
        })
        .collect()
}
