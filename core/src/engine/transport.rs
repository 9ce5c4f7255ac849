//! Transport selection and TLS client configuration

use std::io::BufReader;
use std::sync::Arc;

use rumqttc::Transport;
use rumqttc::tokio_rustls::rustls::client::danger::{
	HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rumqttc::tokio_rustls::rustls::crypto::{
	WebPkiSupportedAlgorithms, ring, verify_tls12_signature,
	verify_tls13_signature,
};
use rumqttc::tokio_rustls::rustls::pki_types::{
	CertificateDer, PrivateKeyDer, ServerName, UnixTime,
};
use rumqttc::tokio_rustls::rustls::{
	self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use tracing::{debug, warn};

use super::{ConnectRequest, EngineError};
use crate::identity::{ClientIdentity, decode_base64};
use crate::options::TlsOptions;

/// Pick the transport for a connect request.
pub(crate) fn build_transport(
	request: &ConnectRequest,
) -> Result<Transport, EngineError> {
	if !request.options.wants_tls(&request.broker) {
		return Ok(Transport::Tcp);
	}
	let config = client_config(request)?;
	Ok(Transport::tls_with_config(config.into()))
}

fn client_config(request: &ConnectRequest) -> Result<ClientConfig, EngineError> {
	let no_material = TlsOptions::default();
	let tls = request.options.tls.as_ref().unwrap_or(&no_material);

	let builder = ClientConfig::builder();
	let builder = if request.options.allow_untrusted_ca.unwrap_or(false) {
		warn!(host = %request.broker.host, "Broker certificate chain validation disabled");
		builder
			.dangerous()
			.with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
	} else {
		builder.with_root_certificates(root_store(tls)?)
	};

	let config = match client_auth(request.identity.as_ref(), tls)? {
		| Some((cert_chain, key)) => builder
			.with_client_auth_cert(cert_chain, key)
			.map_err(|e| EngineError::Transport(e.to_string()))?,
		| None => builder.with_no_client_auth(),
	};
	Ok(config)
}

fn root_store(tls: &TlsOptions) -> Result<RootCertStore, EngineError> {
	let mut roots = RootCertStore::empty();

	if let Some(ca_pem) = &tls.ca {
		for cert in pem_certificates(ca_pem)? {
			roots
				.add(cert)
				.map_err(|e| EngineError::Transport(format!("Invalid CA certificate: {e}")))?;
		}
	}
	if let Some(ca_der) = &tls.ca_der {
		let der = decode_base64(ca_der).map_err(|e| {
			EngineError::Transport(format!("Failed to decode CA certificate: {e}"))
		})?;
		roots
			.add(CertificateDer::from(der))
			.map_err(|e| EngineError::Transport(format!("Invalid CA certificate: {e}")))?;
	}

	if roots.is_empty() {
		let native = rustls_native_certs::load_native_certs().map_err(|e| {
			EngineError::Transport(format!("Failed to load platform trust store: {e}"))
		})?;
		let (added, ignored) = roots.add_parsable_certificates(native);
		debug!(added, ignored, "Loaded platform trust roots");
	}
	Ok(roots)
}

type ClientAuth = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

fn client_auth(
	identity: Option<&ClientIdentity>,
	tls: &TlsOptions,
) -> Result<Option<ClientAuth>, EngineError> {
	if let Some(identity) = identity {
		let identity = identity.clone();
		return Ok(Some((identity.cert_chain, identity.key)));
	}
	match (&tls.cert, &tls.key) {
		| (Some(cert_pem), Some(key_pem)) => {
			let cert_chain = pem_certificates(cert_pem)?;
			let key = rustls_pemfile::private_key(&mut BufReader::new(
				key_pem.as_bytes(),
			))
			.map_err(|e| EngineError::Transport(format!("Failed to read client key: {e}")))?
			.ok_or_else(|| {
				EngineError::Transport("Client key PEM holds no private key".to_string())
			})?;
			Ok(Some((cert_chain, key)))
		}
		| (Some(_), None) | (None, Some(_)) => {
			warn!("Ignoring client certificate without matching key");
			Ok(None)
		}
		| (None, None) => Ok(None),
	}
}

fn pem_certificates(
	pem: &str,
) -> Result<Vec<CertificateDer<'static>>, EngineError> {
	let certs = rustls_pemfile::certs(&mut BufReader::new(pem.as_bytes()))
		.collect::<Result<Vec<_>, _>>()
		.map_err(|e| EngineError::Transport(format!("Failed to read PEM certificate: {e}")))?;
	if certs.is_empty() {
		return Err(EngineError::Transport(
			"PEM input holds no certificate".to_string(),
		));
	}
	Ok(certs)
}

/// Skips chain validation; handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyServerCert {
	algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCert {
	fn new() -> Self {
		Self {
			algorithms: ring::default_provider().signature_verification_algorithms,
		}
	}
}

impl ServerCertVerifier for AcceptAnyServerCert {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		verify_tls12_signature(message, cert, dss, &self.algorithms)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		verify_tls13_signature(message, cert, dss, &self.algorithms)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.algorithms.supported_schemes()
	}
}
