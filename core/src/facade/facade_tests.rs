//! Tests for the facade, driven through the session tasks

use std::time::Duration;

use bytes::Bytes;
use rumqttc::QoS;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::MqttSessions;
use crate::engine::mock::{Call, MockFactory};
use crate::options::ConnectionOptions;
use crate::session::SessionState;
use crate::{Event, SessionError, SessionEvent, SessionHandle};

const BROKER: &str = "mqtt://broker:1883";

fn facade(factory: &MockFactory) -> (MqttSessions, UnboundedReceiver<SessionEvent>) {
	let (tx, rx) = mpsc::unbounded_channel();
	(MqttSessions::with_engine_factory(tx, factory.clone()), rx)
}

fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
	let mut events = Vec::new();
	while let Ok(event) = rx.try_recv() {
		events.push(event);
	}
	events
}

#[tokio::test]
async fn test_new_sessions_are_distinct_and_new() {
	let factory = MockFactory::accepting();
	let (sessions, _events) = facade(&factory);

	let first = sessions.new_session();
	let second = sessions.new_session();

	assert_ne!(first, second);
	assert_eq!(sessions.state(&first).await, Some(SessionState::New));
	let mut live = sessions.sessions();
	live.sort();
	let mut expected = vec![first, second];
	expected.sort();
	assert_eq!(live, expected);
}

#[tokio::test]
async fn test_connect_resolves_and_emits_once() {
	let factory = MockFactory::accepting();
	let (sessions, mut events) = facade(&factory);
	let handle = sessions.new_session();

	let outcome = sessions
		.connect(&handle, BROKER, ConnectionOptions::default())
		.await;

	assert_eq!(outcome, Ok(()));
	assert_eq!(sessions.state(&handle).await, Some(SessionState::Connected));
	assert_eq!(drain(&mut events), vec![SessionEvent::new(
		handle,
		Event::Connect { reconnect: false }
	)]);
}

#[tokio::test]
async fn test_connect_unknown_session() {
	let factory = MockFactory::accepting();
	let (sessions, _events) = facade(&factory);

	let outcome = sessions
		.connect(&SessionHandle::from("ghost"), BROKER, ConnectionOptions::default())
		.await;

	assert_eq!(outcome, Err(SessionError::UnknownSession));
}

#[tokio::test]
async fn test_connect_reports_malformed_url() {
	let factory = MockFactory::accepting();
	let (sessions, _events) = facade(&factory);
	let handle = sessions.new_session();

	let outcome = sessions
		.connect(&handle, "broker-without-scheme", ConnectionOptions::default())
		.await;

	assert!(matches!(outcome, Err(SessionError::MalformedInput(_))));
	assert_eq!(sessions.state(&handle).await, Some(SessionState::New));
}

#[tokio::test]
async fn test_publish_before_connect_is_silently_dropped() {
	let factory = MockFactory::accepting();
	let (sessions, mut events) = facade(&factory);
	let handle = sessions.new_session();

	sessions.publish(&handle, "topic/x", &b"payload"[..], 1, false);
	sessions.subscribe(&handle, vec!["topic/#".to_string()], vec![0]);

	assert_eq!(sessions.state(&handle).await, Some(SessionState::New));
	assert!(factory.probe(&handle).unwrap().calls().is_empty());
	assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_full_lifecycle() {
	let factory = MockFactory::accepting();
	let (sessions, mut events) = facade(&factory);
	let handle = sessions.new_session();
	let probe = factory.probe(&handle).unwrap();

	sessions
		.connect(&handle, BROKER, ConnectionOptions::default())
		.await
		.unwrap();
	sessions.subscribe(&handle, vec!["sensors/+".to_string()], vec![1]);
	sessions.publish_base64(&handle, "sensors/a", "aGVs\nbG8=", 0, true);
	sessions.unsubscribe(&handle, vec!["sensors/+".to_string()]);
	sessions.disconnect(&handle);
	assert_eq!(sessions.state(&handle).await, Some(SessionState::Connected));

	probe.drop_connection(None);
	assert_eq!(sessions.state(&handle).await, Some(SessionState::Disconnected));

	sessions.close(&handle);
	assert_eq!(sessions.state(&handle).await, None);
	assert!(sessions.sessions().is_empty());

	assert_eq!(&probe.calls()[1 ..], &[
		Call::Subscribe(vec![("sensors/+".to_string(), QoS::AtLeastOnce)]),
		Call::Publish {
			topic: "sensors/a".to_string(),
			payload: Bytes::from_static(b"hello"),
			qos: QoS::AtMostOnce,
			retain: true,
		},
		Call::Unsubscribe(vec!["sensors/+".to_string()]),
		Call::Disconnect,
		Call::Shutdown,
	]);
	let events: Vec<Event> =
		drain(&mut events).into_iter().map(|event| event.event).collect();
	assert_eq!(events, vec![
		Event::Connect { reconnect: false },
		Event::Disconnect { cause: None },
	]);

	// Stale handle: every operation is a silent no-op
	sessions.publish(&handle, "sensors/a", Bytes::new(), 0, false);
	sessions.close(&handle);
	let outcome = sessions
		.connect(&handle, BROKER, ConnectionOptions::default())
		.await;
	assert_eq!(outcome, Err(SessionError::UnknownSession));
}

#[tokio::test]
async fn test_close_connected_session_is_refused() {
	let factory = MockFactory::accepting();
	let (sessions, _events) = facade(&factory);
	let handle = sessions.new_session();
	sessions
		.connect(&handle, BROKER, ConnectionOptions::default())
		.await
		.unwrap();

	sessions.close(&handle);

	assert_eq!(sessions.state(&handle).await, Some(SessionState::Connected));
	assert_eq!(sessions.sessions(), vec![handle.clone()]);
	assert!(!factory.probe(&handle).unwrap().calls().contains(&Call::Shutdown));
}

#[tokio::test]
async fn test_bad_base64_payload_publishes_nothing() {
	let factory = MockFactory::accepting();
	let (sessions, _events) = facade(&factory);
	let handle = sessions.new_session();
	sessions
		.connect(&handle, BROKER, ConnectionOptions::default())
		.await
		.unwrap();

	sessions.publish_base64(&handle, "a/b", "***", 0, false);
	sessions.state(&handle).await;

	assert!(
		!factory
			.probe(&handle)
			.unwrap()
			.calls()
			.iter()
			.any(|call| matches!(call, Call::Publish { .. }))
	);
}

#[tokio::test]
async fn test_events_keep_per_session_order() {
	let factory = MockFactory::accepting();
	let (sessions, mut events) = facade(&factory);
	let first = sessions.new_session();
	let second = sessions.new_session();
	for handle in [&first, &second] {
		sessions
			.connect(handle, BROKER, ConnectionOptions::default())
			.await
			.unwrap();
	}
	let first_probe = factory.probe(&first).unwrap();
	let second_probe = factory.probe(&second).unwrap();

	for _ in 0 .. 50 {
		first_probe.deliver("a", b"1");
		second_probe.deliver("b", b"2");
	}
	first_probe.drop_connection(Some("gone"));
	sessions.state(&first).await;
	sessions.state(&second).await;

	let received = drain(&mut events);
	let of = |handle: &SessionHandle| {
		received
			.iter()
			.filter(|event| &event.handle == handle)
			.map(|event| event.event.name())
			.collect::<Vec<_>>()
	};
	let first_names = of(&first);
	assert_eq!(first_names.len(), 52);
	assert_eq!(first_names[0], "connect");
	assert!(first_names[1 .. 51].iter().all(|name| *name == "message"));
	assert_eq!(first_names[51], "disconnect");
	assert_eq!(of(&second).len(), 51);
}

#[tokio::test]
async fn test_shutdown_cancels_pending_connects() {
	let factory = MockFactory::default();
	let (sessions, _events) = facade(&factory);
	let handle = sessions.new_session();

	let outcome = sessions.connect(&handle, BROKER, ConnectionOptions::default());
	assert_eq!(sessions.state(&handle).await, Some(SessionState::Connecting));

	sessions.shutdown().await;

	assert!(matches!(outcome.await, Err(SessionError::Cancelled(_))));
	assert!(sessions.sessions().is_empty());
	assert!(factory.probe(&handle).unwrap().calls().contains(&Call::Shutdown));
}

#[tokio::test]
async fn test_connect_queued_behind_close_is_answered() {
	let factory = MockFactory::accepting();
	let (sessions, _events) = facade(&factory);
	let handle = sessions.new_session();
	let (tx, mut results) = mpsc::unbounded_channel();

	sessions.close(&handle);
	sessions.connect_with_callback(&handle, BROKER, ConnectionOptions::default(), move |result| {
		let _ = tx.send(result);
	});

	let first = tokio::time::timeout(Duration::from_secs(1), results.recv())
		.await
		.expect("callback never fired");
	assert_eq!(first, Some(Err(SessionError::SessionClosed)));
	assert_eq!(results.recv().await, None);
	assert!(sessions.sessions().is_empty());
	assert!(!factory
		.probe(&handle)
		.unwrap()
		.calls()
		.iter()
		.any(|call| matches!(call, Call::Connect { .. })));
}
