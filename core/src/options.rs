//! Connection options and broker addressing
//!
//! The RPC boundary hands options over as a loosely typed bag. They are
//! decoded here into a typed record; unknown keys are ignored and every unset
//! option leaves the engine default untouched.

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::SessionError;

/// Port used when the host URL does not name one.
pub const DEFAULT_PORT: u16 = 1883;

/// Options recognized by `connect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionOptions {
	/// MQTT client identifier; a random one is generated when unset or empty
	pub client_id: Option<String>,
	/// Start without broker-side session state
	pub clean_session: Option<bool>,
	/// Keep-alive interval in seconds
	#[serde(alias = "keepAliveInterval")]
	pub keep_alive: Option<u64>,
	/// Connect timeout in seconds
	pub timeout: Option<u64>,
	/// Maximum outgoing QoS 1/2 messages awaiting acknowledgement
	pub max_in_flight_messages: Option<u16>,
	/// Let the engine re-establish lost connections on its own
	pub auto_reconnect: Option<bool>,
	/// Broker user name
	pub username: Option<String>,
	/// Broker password, only used together with `username`
	pub password: Option<String>,
	/// TLS material
	pub tls: Option<TlsOptions>,
	/// Accept broker certificates that do not chain to a trusted root
	#[serde(rename = "allowUntrustedCA")]
	pub allow_untrusted_ca: Option<bool>,
	/// Force a TLS transport regardless of the URL scheme
	pub enable_ssl: Option<bool>,
}

/// TLS sub-configuration.
///
/// Either a PKCS#12 bundle (`p12` + `pass`) or raw PEM material. The bundle
/// goes through the identity preparer; raw material is handed to the
/// transport unchanged.
#[derive(Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsOptions {
	/// Base64-encoded PKCS#12 bundle holding the client identity
	pub p12: Option<String>,
	/// Passphrase of the PKCS#12 bundle
	pub pass: Option<String>,
	/// PEM-encoded CA certificate(s) to trust
	pub ca: Option<String>,
	/// Base64-encoded DER CA certificate to trust
	pub ca_der: Option<String>,
	/// PEM-encoded client certificate chain
	pub cert: Option<String>,
	/// PEM-encoded client private key
	pub key: Option<String>,
}

impl std::fmt::Debug for TlsOptions {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TlsOptions")
			.field("p12", &self.p12.as_ref().map(|_| "<bundle>"))
			.field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
			.field("ca", &self.ca.is_some())
			.field("ca_der", &self.ca_der.is_some())
			.field("cert", &self.cert.is_some())
			.field("key", &self.key.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

impl TlsOptions {
	/// Whether any trust or client-auth material was supplied.
	pub fn has_material(&self) -> bool {
		self.p12.is_some()
			|| self.ca.is_some()
			|| self.ca_der.is_some()
			|| self.cert.is_some()
			|| self.key.is_some()
	}
}

impl ConnectionOptions {
	/// Decode the option bag received from the RPC boundary.
	pub fn from_json(json: &str) -> Result<Self, SessionError> {
		let malformed = |e: serde_json::Error| {
			SessionError::MalformedInput(format!("Invalid connection options: {e}"))
		};
		let bag: serde_json::Value = serde_json::from_str(json).map_err(malformed)?;
		if !bag.is_object() {
			return Err(SessionError::MalformedInput(
				"Connection options must be a JSON object".to_string(),
			));
		}
		serde_json::from_value(bag).map_err(malformed)
	}

	/// Reject option combinations the engine cannot honour.
	pub fn validate(&self) -> Result<(), SessionError> {
		if let Some(client_id) = &self.client_id {
			if client_id.starts_with(char::is_whitespace) {
				return Err(SessionError::MalformedInput(format!(
					"Client id must not start with whitespace: {client_id:?}"
				)));
			}
		}
		Ok(())
	}

	/// Client id to present to the broker.
	pub fn effective_client_id(&self) -> String {
		match self.client_id.as_deref() {
			| Some(id) if !id.is_empty() => id.to_string(),
			| _ => generated_client_id(),
		}
	}

	/// Whether the connection should run over TLS for this broker.
	pub fn wants_tls(&self, broker: &BrokerAddress) -> bool {
		broker.tls
			|| self.enable_ssl.unwrap_or(false)
			|| self.tls.as_ref().is_some_and(TlsOptions::has_material)
	}
}

fn generated_client_id() -> String {
	let uuid = uuid::Uuid::new_v4().simple().to_string();
	format!("mqtt-session-{}", &uuid[.. 8])
}

/// Broker location parsed from `scheme://hostname[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
	/// Host name or address
	pub host: String,
	/// TCP port, `DEFAULT_PORT` when the URL omits it
	pub port: u16,
	/// Whether the scheme asks for TLS
	pub tls: bool,
}

impl BrokerAddress {
	/// Parse a broker URL.
	///
	/// Accepts `mqtt`/`tcp` (plain) and `mqtts`/`ssl`/`tls` (TLS) schemes.
	pub fn parse(url: &str) -> Result<Self, SessionError> {
		let parsed = Url::parse(url).map_err(|e| {
			SessionError::MalformedInput(format!(
				"Error parsing host URL {url:?}: {e}"
			))
		})?;
		let tls = match parsed.scheme() {
			| "mqtt" | "tcp" => false,
			| "mqtts" | "ssl" | "tls" => true,
			| other => {
				return Err(SessionError::MalformedInput(format!(
					"Unsupported URL scheme {other:?} in {url:?}"
				)));
			}
		};
		let host = parsed
			.host_str()
			.filter(|host| !host.is_empty())
			.ok_or_else(|| {
				SessionError::MalformedInput(format!(
					"Host URL {url:?} has no host name"
				))
			})?;
		Ok(Self {
			host: host.to_string(),
			port: parsed.port().unwrap_or(DEFAULT_PORT),
			tls,
		})
	}
}

/// Map a numeric QoS level to the engine's QoS; unknown levels fall back to 0.
pub fn qos_from_level(level: i64) -> QoS {
	match level {
		| 1 => QoS::AtLeastOnce,
		| 2 => QoS::ExactlyOnce,
		| _ => QoS::AtMostOnce,
	}
}

/// Validate a concrete topic for publishing.
pub(crate) fn validate_publish_topic(topic: &str) -> Result<(), SessionError> {
	if topic.is_empty() || topic.len() > 65535 {
		return Err(SessionError::MalformedInput(format!(
			"Topic {topic:?} is empty or too long"
		)));
	}
	if topic.chars().any(|c| matches!(c, '\0' | '#' | '+')) {
		return Err(SessionError::MalformedInput(format!(
			"Topic {topic:?} contains illegal characters ('#', '+', or null byte)"
		)));
	}
	Ok(())
}
