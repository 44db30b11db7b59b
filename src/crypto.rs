//! External crypto contract (§4.H, §6, §9 open questions)
//!
//! RSA key wrap uses `RSA/ECB/NoPadding` with a fixed byte layout, not
//! one of the `rsa` crate's standard padding schemes, so the block is
//! built and torn down by hand via raw modular exponentiation. AES-128
//! runs in ECB mode block-by-block; both choices are insecure but must
//! be reproduced exactly to interoperate with legacy peers (§9).

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};

use crate::error::CryptoError;

pub const AES_KEY_LEN: usize = 16;
const AES_BLOCK_LEN: usize = 16;

/// Generates a fresh 128-bit AES session key (§4.H `AUTH_REQUEST` success path).
pub fn generate_aes_key() -> [u8; AES_KEY_LEN] {
	let mut key = [0u8; AES_KEY_LEN];
	OsRng.fill_bytes(&mut key);
	key
}

fn printable_random_byte() -> u8 {
	// ASCII 32-126 excluding '"' (34) and '\\' (92) (§4.H padding rule)
	loop {
		let b = 32 + (OsRng.next_u32() % (126 - 32 + 1)) as u8;
		if b != b'"' && b != b'\\' {
			return b;
		}
	}
}

/// Wraps `aes_key` under `public_key` per §4.H: a modulus-sized block
/// with byte 0 held at zero, the key at `1..1+len`, and random bytes
/// filling the rest.
pub fn rsa_wrap_key(public_key: &RsaPublicKey, aes_key: &[u8; AES_KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
	let modulus_len = (public_key.n().bits() + 7) / 8;
	if modulus_len < 2 + AES_KEY_LEN {
		return Err(CryptoError::KeyWrapFailed { message: "RSA modulus too small for key material".to_string() });
	}

	let mut block = vec![0u8; modulus_len];
	block[1..1 + AES_KEY_LEN].copy_from_slice(aes_key);
	for b in &mut block[1 + AES_KEY_LEN..] {
		*b = printable_random_byte();
	}

	let m = BigUint::from_bytes_be(&block);
	let c = m.modpow(public_key.e(), public_key.n());
	Ok(left_pad(&c.to_bytes_be(), modulus_len))
}

/// Unwraps a key block produced by [`rsa_wrap_key`], recovering the
/// AES key from positions `1..1+AES_KEY_LEN`.
pub fn rsa_unwrap_key(private_key: &RsaPrivateKey, wrapped: &[u8]) -> Result<[u8; AES_KEY_LEN], CryptoError> {
	let modulus_len = (private_key.n().bits() + 7) / 8;
	if wrapped.len() != modulus_len {
		return Err(CryptoError::KeyWrapFailed { message: "wrapped key has the wrong length".to_string() });
	}
	let c = BigUint::from_bytes_be(wrapped);
	let m = c.modpow(private_key.d(), private_key.n());
	let block = left_pad(&m.to_bytes_be(), modulus_len);
	if block.len() < 1 + AES_KEY_LEN {
		return Err(CryptoError::KeyWrapFailed { message: "decrypted block too short".to_string() });
	}
	let mut key = [0u8; AES_KEY_LEN];
	key.copy_from_slice(&block[1..1 + AES_KEY_LEN]);
	Ok(key)
}

fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
	if bytes.len() >= len {
		return bytes[bytes.len() - len..].to_vec();
	}
	let mut out = vec![0u8; len - bytes.len()];
	out.extend_from_slice(bytes);
	out
}

/// Encrypts `plaintext` (the JSON document, a newline, then random
/// printable padding to the next 16-byte boundary) with AES-128-ECB.
pub fn aes_encrypt(key: &[u8; AES_KEY_LEN], json: &str) -> Result<Vec<u8>, CryptoError> {
	let cipher = Aes128::new(GenericArray::from_slice(key));

	let mut plaintext = Vec::with_capacity(json.len() + 17);
	plaintext.extend_from_slice(json.as_bytes());
	plaintext.push(b'\n');
	while plaintext.len() % AES_BLOCK_LEN != 0 {
		plaintext.push(printable_random_byte());
	}

	let mut out = plaintext;
	for chunk in out.chunks_mut(AES_BLOCK_LEN) {
		let block = GenericArray::from_mut_slice(chunk);
		cipher.encrypt_block(block);
	}
	Ok(out)
}

/// Decrypts an AES-128-ECB ciphertext and recovers the JSON document
/// preceding the first newline (§4.H "Decryption splits at the first
/// newline").
pub fn aes_decrypt(key: &[u8; AES_KEY_LEN], ciphertext: &[u8]) -> Result<String, CryptoError> {
	if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_LEN != 0 {
		return Err(CryptoError::BlockCipherFailed { message: "ciphertext is not block-aligned".to_string() });
	}
	let cipher = Aes128::new(GenericArray::from_slice(key));

	let mut out = ciphertext.to_vec();
	for chunk in out.chunks_mut(AES_BLOCK_LEN) {
		let block = GenericArray::from_mut_slice(chunk);
		cipher.decrypt_block(block);
	}

	let newline = out
		.iter()
		.position(|&b| b == b'\n')
		.ok_or_else(|| CryptoError::BlockCipherFailed { message: "no newline in decrypted block".to_string() })?;
	String::from_utf8(out[..newline].to_vec())
		.map_err(|_| CryptoError::BlockCipherFailed { message: "decrypted JSON was not valid UTF-8".to_string() })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn aes_round_trips_through_ecb() {
		let key = generate_aes_key();
		let json = r#"{"command":"LIST_PEERS_REQUEST"}"#;
		let ciphertext = aes_encrypt(&key, json).unwrap();
		assert_eq!(ciphertext.len() % AES_BLOCK_LEN, 0);
		let decrypted = aes_decrypt(&key, &ciphertext).unwrap();
		assert_eq!(decrypted, json);
	}

	#[test]
	fn rsa_wrap_round_trips() {
		let private_key = RsaPrivateKey::new(&mut OsRng, 512).unwrap();
		let public_key = RsaPublicKey::from(&private_key);
		let key = generate_aes_key();

		let wrapped = rsa_wrap_key(&public_key, &key).unwrap();
		assert_eq!(wrapped.len(), 64);
		assert_eq!(wrapped[0], 0);
		let unwrapped = rsa_unwrap_key(&private_key, &wrapped).unwrap();
		assert_eq!(unwrapped, key);
	}
}

// vim: ts=4
