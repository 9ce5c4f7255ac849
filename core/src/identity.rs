//! Client identity preparation from PKCS#12 bundles
//!
//! A bundle arrives as base64 text plus a passphrase. Preparing it yields the
//! certificate chain and private key the transport installs for mutual TLS.
//! Nothing is cached: every connect attempt prepares its own identity.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use p12::PFX;
use rumqttc::tokio_rustls::rustls::pki_types::{
	CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer,
};
use thiserror::Error;

/// Errors while preparing a client identity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
	/// Input is not base64, not a PKCS#12 container, or holds no identity
	#[error("{0}")]
	MalformedInput(String),
	/// The passphrase does not open the bundle
	#[error("PKCS#12 import failed (errSecAuthFailed). Incorrect password?")]
	AuthenticationFailed,
}

/// Client certificate chain and private key for mutual TLS.
#[derive(Debug)]
pub struct ClientIdentity {
	/// Leaf certificate first
	pub cert_chain: Vec<CertificateDer<'static>>,
	/// PKCS#8 private key matching the leaf certificate
	pub key: PrivateKeyDer<'static>,
}

impl Clone for ClientIdentity {
	fn clone(&self) -> Self {
		Self {
			cert_chain: self.cert_chain.clone(),
			key: self.key.clone_key(),
		}
	}
}

/// Decode a base64-encoded PKCS#12 bundle into a client identity.
///
/// When the bundle carries several keys, the first one wins.
pub fn prepare(
	bundle_base64: &str,
	passphrase: &str,
) -> Result<ClientIdentity, IdentityError> {
	let der = decode_base64(bundle_base64).map_err(|e| {
		IdentityError::MalformedInput(format!(
			"Failed to read p12 certificate: {e}"
		))
	})?;
	let pfx = PFX::parse(&der).map_err(|e| {
		IdentityError::MalformedInput(format!(
			"Failed to read p12 certificate: {e:?}"
		))
	})?;
	if !pfx.verify_mac(passphrase) {
		return Err(IdentityError::AuthenticationFailed);
	}

	let key = pfx
		.key_bags(passphrase)
		.map_err(|e| unreadable(format!("{e:?}")))?
		.into_iter()
		.next()
		.ok_or_else(|| unreadable("bundle holds no private key"))?;
	let cert_chain: Vec<CertificateDer<'static>> = pfx
		.cert_x509_bags(passphrase)
		.map_err(|e| unreadable(format!("{e:?}")))?
		.into_iter()
		.map(CertificateDer::from)
		.collect();
	if cert_chain.is_empty() {
		return Err(unreadable("bundle holds no certificate"));
	}

	Ok(ClientIdentity {
		cert_chain,
		key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)),
	})
}

fn unreadable(reason: impl std::fmt::Display) -> IdentityError {
	IdentityError::MalformedInput(format!(
		"Failed to properly read p12 certificate: {reason}"
	))
}

/// Standard base64 decoding that skips whitespace and line breaks.
pub(crate) fn decode_base64(
	input: &str,
) -> Result<Vec<u8>, base64::DecodeError> {
	let compact: String =
		input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
	STANDARD.decode(compact)
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	/// EC P-256 identity, SHA1 MAC, 3DES-encrypted bags, passphrase "hunter2"
	const BUNDLE: &str = "MIID0wIBAzCCA5kGCSqGSIb3DQEHAaCCA4oEggOGMIIDgjCCAlcGCSqGSIb3DQEHBqCCAkgwggJEAgEAMIICPQYJKoZIhvcNAQcBMBwGCiqGSIb3DQEMAQMwDgQIXKkoa+x+75sCAggAgIICEDl4F5ytl4Hbo+C6g6cxPx4spK+NMCDE9ptmhVBx6q3Mn+qPjai6hdRme8jV/hXUMzRWGAcVd+9u7LAA5iw0XTvqovgeHfc3SG/xgRqGS/XdkZeJ0n+mMRwxeQwPQfFjsSE8ZqhMEC80mXwgUgc3MX7u+7iFOcxJ+IwNL9YexiEdHBZJiTKE8O6VJAUFA7rfx9qsury0mKojkAl+wDw5vuwUZeeRLfgibnTXrB++FyZaBWVktCq6omzZtRmhuaD1t5U3qQXCBSreVrMNSEbvbR6lofILaZJBLc20BNEwskmTn5E87UlbB5IQPyZ7HozrBZB2Wgn8CUXG2JJ8ni4lKqFmY/7PwikCZ73FwG/yCVr6SCuh+76akWi2iELPb+FLftEgye/rPV42DtpJKQkDzNXasy+qKJJ011nH+oVWbTd15uY1+efgft0rpmb/NUVhUD6SLQcFgabA+QUeAgNGWm85dBBWqAwhWg1/Aj1t4o3kMUrTfL/CSFA7U1UnNYo+h6OHXlb4K4dTajIYrqny4ExH7+t9kby7lJMFRcOMSUttFfETSzrabTVjhJhNwgf8cPG0l+KZBA58OzRIKSU0klE8+RwGOXW7vNoMlokF6rbk5FT5ROW/u0Z+v3eMUefBVlwcJwNhfjSqG4JGunQC7CaDCOO85WSql3mi6MWsZ4A3LoVzSdn+qOUHEgUeyfUlPDCCASMGCSqGSIb3DQEHAaCCARQEggEQMIIBDDCCAQgGCyqGSIb3DQEMCgECoIG0MIGxMBwGCiqGSIb3DQEMAQMwDgQIh9p/VtXTn+QCAggABIGQjCnxwsnF6IpqMzrDo96/FuTsKnSrbIfDRH2xcmaEUkOIrhQKzySHxGGuYHTfJ8xNHsDJlRDEsassMUvRBwosp7g4zyJDbtUvhQqgPBqvA97IfbWrKNUy9IgUa8R/2kIZEcFwWcWkGHLs6F3+Sowk5NH+NCHCwPPGkGAw5YJ7u63S0gF8P2cOsOaONpYSEzVnMUIwGwYJKoZIhvcNAQkUMQ4eDABjAGwAaQBlAG4AdDAjBgkqhkiG9w0BCRUxFgQUGU3FwHlDeAGMDr2DpA3E25UpcowwMTAhMAkGBSsOAwIaBQAEFCWWPtjuwA21P+EOIfiUEdxsfxQNBAhtiCmYE9n1+gICCAA=";

	/// Certificate-only bundle (no key bag), passphrase "hunter2"
	const CERT_ONLY_BUNDLE: &str = "MIICbAIBAzCCAjIGCSqGSIb3DQEHAaCCAiMEggIfMIICGzCCAhcGCSqGSIb3DQEHBqCCAggwggIEAgEAMIIB/QYJKoZIhvcNAQcBMBwGCiqGSIb3DQEMAQMwDgQIz81/1wUdKcMCAggAgIIB0CDmeEeKZ8RMB/sPlySxGPUfLyiGUYq3zkeOe6gcC2Drc/nBo3nxMLACi+rHZYjJQwU048pzT3/VdARqH9ZW0N5BGC6MVJ4bTX9NInUA+zJBLhAA9Jz2Q6GjrYxo7nBEqg5CB7KHSzTj7Ua8EIpriyFvHYwAtWn3zmtiA79DJKM8bO9Fwij6Fhy7rt6eiBQY/UKK8V4WU4SSErO0Ni+sBJ6WeOMo1VK0sXq/2tXfJhWj8eVAPzwXdP8CCszqwo1f8RF+k3RVeClPC59X8TE0kXPUq+L+5Zs+1Ma7UN+3Ba7TUd52vc9FFEp1AZHvDkUG5F5Y/Jc2DQoBxILyiiixN9U4DyHwY1wP9mQCFjEJfMBkaYFtjRyxMPv9vdmkRfGvtBqhGxx3KDQxqM3z2d/iK5pRm85BFk6ve/PWy9nEAJ9Y+vunGBSPzOoZGuwqK5kgp8E4QoUnh/syfZvhGwcWd6h5UaM5wbd4l9tkXFiXjb/PYgLcUtRvlwejPsRyp/FwdMcXdJDlgEkPmz99Xyl0gdUsbkUaLrZSrXWHmVfwVaerVfLNjNJSUwIa4DqY2Bfuc1zG7n6l5gvfaRWBQ1WxhMHu7gTIWXBaUQqJXdZdOT8vMDEwITAJBgUrDgMCGgUABBSfXm1dItJeA2wYy1KBqDh/sM/5jwQI+1QGqxmb9+QCAggA";

	pub(crate) fn test_bundle() -> (&'static str, &'static str) {
		(BUNDLE, "hunter2")
	}

	#[test]
	fn test_prepare_valid_bundle() {
		let identity = prepare(BUNDLE, "hunter2").unwrap();
		assert_eq!(identity.cert_chain.len(), 1);
		assert!(matches!(identity.key, PrivateKeyDer::Pkcs8(_)));
	}

	#[test]
	fn test_prepare_tolerates_line_breaks() {
		let wrapped: String = BUNDLE
			.as_bytes()
			.chunks(64)
			.map(|line| format!("{}\n", std::str::from_utf8(line).unwrap()))
			.collect();
		assert!(prepare(&wrapped, "hunter2").is_ok());
	}

	#[test]
	fn test_prepare_wrong_passphrase() {
		let result = prepare(BUNDLE, "hunter3");
		assert_eq!(result.unwrap_err(), IdentityError::AuthenticationFailed);
	}

	#[test]
	fn test_prepare_bad_base64() {
		let result = prepare("this is *not* base64!", "hunter2");
		assert!(matches!(result, Err(IdentityError::MalformedInput(_))));
	}

	#[test]
	fn test_prepare_not_a_bundle() {
		let result = prepare("aGVsbG8gd29ybGQ=", "hunter2");
		assert!(matches!(result, Err(IdentityError::MalformedInput(_))));
	}

	#[test]
	fn test_prepare_bundle_without_key() {
		let result = prepare(CERT_ONLY_BUNDLE, "hunter2");
		assert!(matches!(result, Err(IdentityError::MalformedInput(_))));
	}
}
