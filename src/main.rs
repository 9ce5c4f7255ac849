//! Demo: two sessions on one broker, one publishing to the other.
//!
//! ```bash
//! MQTT_BROKER=mqtt://localhost:1883 RUST_LOG=info cargo run
//! ```

use std::time::Duration;

use mqtt_sessions::{ConnectionOptions, Event, MqttClient, SessionHub};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BROKER: &str = "mqtt://localhost:1883";
const TOPIC: &str = "mqtt-sessions/demo/greeting";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	dotenv::dotenv().ok();
	setup_tracing();

	let broker =
		std::env::var("MQTT_BROKER").unwrap_or_else(|_| DEFAULT_BROKER.to_string());
	println!("Using broker {broker}");

	let hub = SessionHub::new();
	let mut listener = hub.client();
	let mut speaker = hub.client();

	listener
		.connect(&broker, ConnectionOptions {
			client_id: Some("sessions-demo-listener".to_string()),
			..Default::default()
		})
		.await?;
	speaker.connect(&broker, ConnectionOptions::default()).await?;
	info!(listener = %listener.handle(), speaker = %speaker.handle(), "Both sessions connected");

	listener.subscribe(vec![TOPIC.to_string()], vec![1])?;
	// Give the broker a moment to register the subscription
	tokio::time::sleep(Duration::from_millis(300)).await;

	for i in 0 .. 3 {
		speaker.publish(TOPIC, format!("hello #{i}"), 1, false)?;
	}

	let mut received = 0;
	while received < 3 {
		let next = tokio::time::timeout(Duration::from_secs(5), listener.next_event());
		match next.await {
			| Ok(Some(Event::Message { topic, payload })) => {
				received += 1;
				println!("{topic}: {}", String::from_utf8_lossy(&payload));
			}
			| Ok(Some(Event::Error { message })) => error!(error = %message, "Session error"),
			| Ok(Some(other)) => info!(event = other.name(), "Session event"),
			| Ok(None) => break,
			| Err(_) => {
				error!("No message within 5s, giving up");
				break;
			}
		}
	}

	for client in [&mut listener, &mut speaker] {
		client.disconnect()?;
		wait_for_disconnect(client).await;
	}
	hub.shutdown().await;
	println!("Received {received} message(s)");
	Ok(())
}

/// Wait until the DISCONNECT went out, so shutdown does not cut it off.
async fn wait_for_disconnect(client: &mut MqttClient) {
	let disconnected = async {
		while let Some(event) = client.next_event().await {
			if let Event::Disconnect { .. } = event {
				return true;
			}
		}
		false
	};
	match tokio::time::timeout(Duration::from_secs(2), disconnected).await {
		| Ok(true) => info!("Session disconnected"),
		| Ok(false) => warn!("Event stream ended before disconnect"),
		| Err(_) => warn!("No disconnect within 2s, shutting down anyway"),
	}
}

/// `RUST_LOG` drives the filter; silent when unset or when
/// `RUST_LOG_DISABLE` is set.
fn setup_tracing() {
	if std::env::var("RUST_LOG_DISABLE").is_ok() || std::env::var("RUST_LOG").is_err()
	{
		return;
	}
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| "info".into());
	tracing_subscriber::registry()
		.with(filter)
		.with(
			tracing_subscriber::fmt::layer()
				.with_target(true)
				.with_thread_ids(false)
				.with_file(false)
				.with_line_number(false)
				.compact(),
		)
		.init();
}
