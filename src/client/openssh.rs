//! Minimal OpenSSH `ssh-rsa` public key parser
//!
//! `authorized_keys` (§6) holds OpenSSH-formatted public keys; the
//! client channel needs the raw RSA modulus/exponent out of them to
//! wrap a session key (§4.H). Only the `ssh-rsa` wire format is
//! supported, matching the key kind specified in §6.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::{BigUint, RsaPublicKey};
use std::convert::TryInto;

use crate::error::CryptoError;

/// Parses one `ssh-rsa AAAA... comment` line into its RSA public key.
pub fn parse_ssh_rsa_public_key(line: &str) -> Result<RsaPublicKey, CryptoError> {
	let mut fields = line.split_whitespace();
	let kind = fields.next().ok_or_else(|| malformed("empty key line"))?;
	if kind != "ssh-rsa" {
		return Err(malformed(&format!("unsupported key type '{}'", kind)));
	}
	let blob_b64 = fields.next().ok_or_else(|| malformed("missing key blob"))?;
	let blob = BASE64.decode(blob_b64).map_err(|e| malformed(&e.to_string()))?;

	let mut cursor = &blob[..];
	let kind_field = read_ssh_string(&mut cursor)?;
	if kind_field != b"ssh-rsa" {
		return Err(malformed("blob key type does not match header"));
	}
	let e = BigUint::from_bytes_be(&read_ssh_string(&mut cursor)?);
	let n = BigUint::from_bytes_be(&read_ssh_string(&mut cursor)?);

	RsaPublicKey::new(n, e).map_err(|err| malformed(&err.to_string()))
}

fn read_ssh_string<'a>(cursor: &mut &'a [u8]) -> Result<&'a [u8], CryptoError> {
	if cursor.len() < 4 {
		return Err(malformed("truncated length-prefixed field"));
	}
	let (len_bytes, rest) = cursor.split_at(4);
	let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
	if rest.len() < len {
		return Err(malformed("truncated length-prefixed field"));
	}
	let (field, rest) = rest.split_at(len);
	*cursor = rest;
	Ok(field)
}

fn malformed(message: &str) -> CryptoError {
	CryptoError::KeyWrapFailed { message: format!("malformed ssh-rsa key: {}", message) }
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::OsRng;
	use rsa::traits::PublicKeyParts;
	use rsa::RsaPrivateKey;

	fn encode_ssh_rsa(public_key: &RsaPublicKey) -> String {
		let mut blob = Vec::new();
		for field in [b"ssh-rsa".as_slice(), &public_key.e().to_bytes_be(), &public_key.n().to_bytes_be()] {
			blob.extend_from_slice(&(field.len() as u32).to_be_bytes());
			blob.extend_from_slice(field);
		}
		format!("ssh-rsa {} test@bitbox", BASE64.encode(blob))
	}

	#[test]
	fn parses_a_generated_key() {
		let private_key = RsaPrivateKey::new(&mut OsRng, 512).unwrap();
		let public_key = RsaPublicKey::from(&private_key);
		let line = encode_ssh_rsa(&public_key);

		let parsed = parse_ssh_rsa_public_key(&line).unwrap();
		assert_eq!(parsed.n(), public_key.n());
		assert_eq!(parsed.e(), public_key.e());
	}

	#[test]
	fn rejects_unsupported_key_type() {
		assert!(parse_ssh_rsa_public_key("ssh-ed25519 AAAA comment").is_err());
	}
}

// vim: ts=4
