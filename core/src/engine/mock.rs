//! Recording engine for tests

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::QoS;

use super::{
	ConnectFailure, ConnectRequest, Engine, EngineError, EngineEvent,
	EngineEvents, EngineFactory,
};
use crate::SessionHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
	Connect { client_id: Option<String>, has_identity: bool },
	Subscribe(Vec<(String, QoS)>),
	Unsubscribe(Vec<String>),
	Publish { topic: String, payload: Bytes, qos: QoS, retain: bool },
	Disconnect,
	Shutdown,
}

#[derive(Debug, Default)]
struct ProbeState {
	calls: Vec<Call>,
	events: Option<EngineEvents>,
	requests: Vec<ConnectRequest>,
	fail_requests: bool,
}

/// Shared view into a [`MockEngine`], kept by the test.
#[derive(Debug, Clone, Default)]
pub(crate) struct Probe(Arc<Mutex<ProbeState>>);

impl Probe {
	pub(crate) fn calls(&self) -> Vec<Call> {
		self.0.lock().calls.clone()
	}

	pub(crate) fn last_request(&self) -> Option<ConnectRequest> {
		self.0.lock().requests.last().cloned()
	}

	pub(crate) fn fail_requests(&self, fail: bool) {
		self.0.lock().fail_requests = fail;
	}

	/// Raise an event on the channel handed to the latest `connect`.
	pub(crate) fn raise(&self, event: EngineEvent) -> bool {
		let events = self.0.lock().events.clone();
		events.is_some_and(|events| events.emit(event))
	}

	pub(crate) fn accept(&self) -> bool {
		self.raise(EngineEvent::ConnAck(Ok(())))
	}

	pub(crate) fn reject(&self, failure: ConnectFailure) -> bool {
		self.raise(EngineEvent::ConnAck(Err(failure)))
	}

	pub(crate) fn drop_connection(&self, cause: Option<&str>) -> bool {
		self.raise(EngineEvent::Disconnected {
			cause: cause.map(str::to_string),
		})
	}

	pub(crate) fn deliver(&self, topic: &str, payload: &'static [u8]) -> bool {
		self.raise(EngineEvent::Message {
			topic: topic.to_string(),
			payload: Bytes::from_static(payload),
		})
	}
}

#[derive(Debug)]
pub(crate) struct MockEngine {
	probe: Probe,
	auto_accept: bool,
}

impl MockEngine {
	pub(crate) fn new() -> (Self, Probe) {
		let probe = Probe::default();
		let engine = Self {
			probe: probe.clone(),
			auto_accept: false,
		};
		(engine, probe)
	}

	/// Engine that acknowledges every connect right away.
	pub(crate) fn accepting() -> (Self, Probe) {
		let (mut engine, probe) = Self::new();
		engine.auto_accept = true;
		(engine, probe)
	}

	fn record(&self, call: Call) -> Result<(), EngineError> {
		let mut state = self.probe.0.lock();
		state.calls.push(call);
		if state.fail_requests {
			return Err(EngineError::Transport("request refused by mock".to_string()));
		}
		Ok(())
	}
}

impl Engine for MockEngine {
	fn connect(
		&mut self,
		request: ConnectRequest,
		events: EngineEvents,
	) -> Result<(), EngineError> {
		self.record(Call::Connect {
			client_id: request.options.client_id.clone(),
			has_identity: request.identity.is_some(),
		})?;
		{
			let mut state = self.probe.0.lock();
			state.requests.push(request);
			state.events = Some(events.clone());
		}
		if self.auto_accept {
			events.emit(EngineEvent::ConnAck(Ok(())));
		}
		Ok(())
	}

	fn subscribe(&mut self, filters: Vec<(String, QoS)>) -> Result<(), EngineError> {
		self.record(Call::Subscribe(filters))
	}

	fn unsubscribe(&mut self, topics: Vec<String>) -> Result<(), EngineError> {
		self.record(Call::Unsubscribe(topics))
	}

	fn publish(
		&mut self,
		topic: String,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	) -> Result<(), EngineError> {
		self.record(Call::Publish {
			topic,
			payload,
			qos,
			retain,
		})
	}

	fn disconnect(&mut self) -> Result<(), EngineError> {
		self.record(Call::Disconnect)
	}

	fn shutdown(&mut self) {
		self.probe.0.lock().calls.push(Call::Shutdown);
	}
}

/// Factory recording the probe of every engine it hands out.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockFactory {
	auto_accept: bool,
	probes: Arc<Mutex<Vec<(SessionHandle, Probe)>>>,
}

impl MockFactory {
	pub(crate) fn accepting() -> Self {
		Self {
			auto_accept: true,
			..Default::default()
		}
	}

	pub(crate) fn probe(&self, handle: &SessionHandle) -> Option<Probe> {
		self.probes
			.lock()
			.iter()
			.find(|(owner, _)| owner == handle)
			.map(|(_, probe)| probe.clone())
	}
}

impl EngineFactory for MockFactory {
	fn create(&self, handle: &SessionHandle) -> Box<dyn Engine> {
		let (engine, probe) = if self.auto_accept {
			MockEngine::accepting()
		} else {
			MockEngine::new()
		};
		self.probes.lock().push((handle.clone(), probe));
		Box::new(engine)
	}
}
