use std::time::Duration;

use bytes::Bytes;
use rumqttc::Packet::{self, Disconnect, Publish};
use rumqttc::{
	AsyncClient, ConnAck, ConnectReturnCode, ConnectionError, EventLoop,
	MqttOptions, QoS, SubscribeFilter, SubscribeReasonCode,
};
use rumqttc::{Event::Incoming, Event::Outgoing};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::transport::build_transport;
use super::{
	ConnectFailure, ConnectRequest, Engine, EngineError, EngineEvent,
	EngineEvents, EngineFactory,
};
use crate::SessionHandle;

/// Engine-level behavior settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
	/// Capacity of the request channel between client and event loop
	pub event_loop_capacity: usize,
	/// Connect timeout used when the options do not set one
	pub connection_timeout_millis: u64,
	/// First delay between reconnect attempts
	pub initial_retry_delay: Duration,
	/// Upper bound of the reconnect backoff
	pub max_retry_delay: Duration,
	/// Consecutive failed reconnects before giving up; `None` retries forever
	pub max_reconnect_attempts: Option<u32>,
}

impl Default for EngineSettings {
	fn default() -> Self {
		Self {
			event_loop_capacity: 10,
			connection_timeout_millis: 10_000,
			initial_retry_delay: Duration::from_millis(100),
			max_retry_delay: Duration::from_secs(30),
			max_reconnect_attempts: Some(10),
		}
	}
}

const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// [`Engine`] driving one `rumqttc` client and its event loop.
#[derive(Debug)]
pub struct RumqttEngine {
	settings: EngineSettings,
	client: Option<AsyncClient>,
	pump: Option<JoinHandle<()>>,
}

impl RumqttEngine {
	/// Create an idle engine.
	pub fn new(settings: EngineSettings) -> Self {
		Self {
			settings,
			client: None,
			pump: None,
		}
	}

	fn client(&self) -> Result<&AsyncClient, EngineError> {
		self.client.as_ref().ok_or(EngineError::Inactive)
	}

	fn mqtt_options(
		&self,
		request: &ConnectRequest,
	) -> Result<MqttOptions, EngineError> {
		let options = &request.options;
		let client_id = options.effective_client_id();
		let mut mqtt =
			MqttOptions::new(client_id, request.broker.host.clone(), request.broker.port);

		if let Some(keep_alive) = options.keep_alive {
			mqtt.set_keep_alive(Duration::from_secs(
				keep_alive.max(MIN_KEEP_ALIVE_SECS),
			));
		}
		if let Some(clean_session) = options.clean_session {
			mqtt.set_clean_session(clean_session);
		}
		if let Some(inflight) = options.max_in_flight_messages {
			mqtt.set_inflight(inflight.max(1));
		}
		match (&options.username, &options.password) {
			| (Some(username), password) => {
				mqtt.set_credentials(
					username.clone(),
					password.clone().unwrap_or_default(),
				);
			}
			| (None, Some(_)) => {
				warn!("Ignoring password without username");
			}
			| (None, None) => {}
		}
		mqtt.set_transport(build_transport(request)?);
		Ok(mqtt)
	}

	fn stop_pump(&mut self) {
		if let Some(pump) = self.pump.take() {
			pump.abort();
		}
	}
}

impl Engine for RumqttEngine {
	fn connect(
		&mut self,
		request: ConnectRequest,
		events: EngineEvents,
	) -> Result<(), EngineError> {
		self.stop_pump();
		let mqtt = self.mqtt_options(&request)?;
		let timeout_millis = request
			.options
			.timeout
			.map(|secs| secs.saturating_mul(1000))
			.unwrap_or(self.settings.connection_timeout_millis);

		let (client, event_loop) =
			AsyncClient::new(mqtt, self.settings.event_loop_capacity);
		info!(
			host = %request.broker.host,
			port = request.broker.port,
			generation = events.generation(),
			"Connecting to MQTT broker"
		);
		let pump = EventPump {
			event_loop,
			events,
			settings: self.settings.clone(),
			timeout_millis,
			auto_reconnect: request.options.auto_reconnect.unwrap_or(false),
		};
		self.pump = Some(tokio::spawn(pump.run()));
		self.client = Some(client);
		Ok(())
	}

	fn subscribe(&mut self, filters: Vec<(String, QoS)>) -> Result<(), EngineError> {
		let filters = filters
			.into_iter()
			.map(|(path, qos)| SubscribeFilter::new(path, qos));
		self.client()?.try_subscribe_many(filters)?;
		Ok(())
	}

	fn unsubscribe(&mut self, topics: Vec<String>) -> Result<(), EngineError> {
		let client = self.client()?;
		for topic in topics {
			client.try_unsubscribe(topic)?;
		}
		Ok(())
	}

	fn publish(
		&mut self,
		topic: String,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	) -> Result<(), EngineError> {
		self.client()?.try_publish(topic, qos, retain, payload.to_vec())?;
		Ok(())
	}

	fn disconnect(&mut self) -> Result<(), EngineError> {
		self.client()?.try_disconnect()?;
		Ok(())
	}

	fn shutdown(&mut self) {
		self.stop_pump();
		self.client = None;
	}
}

impl Drop for RumqttEngine {
	fn drop(&mut self) {
		self.stop_pump();
	}
}

/// Builds a [`RumqttEngine`] per session.
#[derive(Debug, Clone, Default)]
pub struct RumqttEngineFactory {
	settings: EngineSettings,
}

impl RumqttEngineFactory {
	/// Factory handing `settings` to every engine it creates.
	pub fn new(settings: EngineSettings) -> Self {
		Self { settings }
	}
}

impl EngineFactory for RumqttEngineFactory {
	fn create(&self, handle: &SessionHandle) -> Box<dyn Engine> {
		debug!(handle = %handle, "Creating rumqttc engine");
		Box::new(RumqttEngine::new(self.settings.clone()))
	}
}

/// Task polling one event loop and translating it into [`EngineEvent`]s.
struct EventPump {
	event_loop: EventLoop,
	events: EngineEvents,
	settings: EngineSettings,
	timeout_millis: u64,
	auto_reconnect: bool,
}

impl EventPump {
	async fn run(mut self) {
		let timeout_millis = self.timeout_millis;
		let outcome = time::timeout(
			Duration::from_millis(timeout_millis),
			Self::establish_connection(&mut self.event_loop),
		)
		.await
		.unwrap_or(Err(ConnectFailure::Timeout { timeout_millis }));

		let accepted = outcome.is_ok();
		if !self.events.emit(EngineEvent::ConnAck(outcome)) || !accepted {
			return;
		}
		self.pump().await;
		debug!(generation = self.events.generation(), "MQTT event pump stopped");
	}

	async fn establish_connection(
		event_loop: &mut EventLoop,
	) -> Result<(), ConnectFailure> {
		loop {
			match event_loop.poll().await {
				| Ok(Incoming(Packet::ConnAck(ConnAck { code, .. }))) => {
					if code == ConnectReturnCode::Success {
						info!("MQTT connection established");
						return Ok(());
					}
					debug!(code = ?code, "MQTT connection rejected by broker");
					return Err(ConnectFailure::Refused { code });
				}
				| Ok(notification) => {
					debug!(notification = ?notification, "Bootstrap phase notification");
				}
				| Err(ConnectionError::ConnectionRefused(code)) => {
					debug!(code = ?code, "MQTT connection rejected by broker");
					return Err(ConnectFailure::Refused { code });
				}
				| Err(err) => {
					debug!(error = %err, "MQTT connection error during bootstrap phase");
					return Err(ConnectFailure::Network(err.to_string()));
				}
			}
		}
	}

	/// Runs until the connection is closed for good or the session is gone.
	async fn pump(&mut self) {
		let mut error_count = 0;
		let mut connected = true;

		loop {
			let alive = match self.event_loop.poll().await {
				| Ok(Incoming(Packet::ConnAck(ConnAck {
					session_present,
					code: ConnectReturnCode::Success,
				}))) => {
					error_count = 0;
					connected = true;
					info!(session_present, "MQTT connection re-established");
					self.events.emit(EngineEvent::ConnAck(Ok(())))
				}
				| Ok(Incoming(Publish(p))) => {
					error_count = 0;
					debug!(topic = %p.topic, payload_size = p.payload.len(), "Received MQTT message");
					self.events.emit(EngineEvent::Message {
						topic: p.topic,
						payload: p.payload,
					})
				}
				| Ok(Incoming(Packet::SubAck(ack))) => {
					let refused = ack
						.return_codes
						.iter()
						.filter(|code| matches!(code, SubscribeReasonCode::Failure))
						.count();
					if refused == 0 {
						true
					} else {
						warn!(pkid = ack.pkid, refused, "Broker refused subscription");
						self.events.emit(EngineEvent::Error(format!(
							"Error subscribing: broker refused {refused} of {} filter(s)",
							ack.return_codes.len()
						)))
					}
				}
				| Ok(Incoming(Disconnect)) => {
					info!("Received MQTT Disconnect packet from server");
					self.events.emit(EngineEvent::Disconnected {
						cause: Some("Connection closed by broker".to_string()),
					});
					break;
				}
				| Ok(Outgoing(rumqttc::Outgoing::Disconnect)) => {
					info!("Sent MQTT Disconnect packet to server");
					self.events.emit(EngineEvent::Disconnected { cause: None });
					break;
				}
				| Ok(notification) => {
					error_count = 0;
					debug!(notification = ?notification, "Received MQTT notification");
					true
				}
				| Err(err) => {
					error!(error_count, error = %err, "MQTT event loop error");
					if connected {
						connected = false;
						if !self.events.emit(EngineEvent::Disconnected {
							cause: Some(err.to_string()),
						}) {
							break;
						}
					}
					if !self.auto_reconnect {
						break;
					}

					error_count += 1;
					if self
						.settings
						.max_reconnect_attempts
						.is_some_and(|max| error_count >= max)
					{
						error!(error_count, "Too many consecutive errors, giving up");
						self.events.emit(EngineEvent::Error(format!(
							"Reconnect abandoned after {error_count} consecutive failures"
						)));
						break;
					}

					let delay = self.settings.initial_retry_delay
						* 2_u32.pow((error_count - 1).min(10));
					let delay = delay.min(self.settings.max_retry_delay);
					warn!(delay = ?delay, error_count, "Retrying MQTT connection");
					time::sleep(delay).await;
					true
				}
			};
			if !alive {
				debug!("Session dropped its engine events, stopping pump");
				break;
			}
		}
	}
}
