//! Payload codec: request envelopes, response decryption, host-entry and asset decryption.
//!
//! Three independent AES-256-CBC/PKCS7 key sets are fixed at build time:
//! one for request/response envelopes, one for opaque host entries
//! (`base64(iv):base64(ciphertext)`, key zero-padded to 32 bytes) and one
//! for binary assets such as advert images. Signatures are MD5 over
//! `timestamp ++ ciphertext ++ SIGN_KEY`, hex encoded.

use std::time::{SystemTime, UNIX_EPOCH};

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::Value;

use crate::protocol::RequestEnvelope;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const SIGN_KEY: &str = "super-secret-sign";
const REQUEST_KEY: &[u8; 32] = b"mHZ3LVwW8ukKEVvWM1dQi5cyP8pXHFpN";
const REQUEST_IV: &[u8; 16] = b"Avbn58RBm4RzprRw";
/// Shorter than a key; zero-padded to 32 bytes by `host_key`.
const HOST_KEY_SEED: &[u8] = b"9C+^vMGy#9qynefGF2Bx1234";
const ASSET_KEY: &[u8; 32] = b"k9:3zeFq~]-EQMF,gpGx*uRw+x,n]xw9";
const ASSET_IV: &[u8; 16] = b"Zd3!t#t1YN=!fs)D";

const IV_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("bad padding or truncated ciphertext")]
    Padding,
    #[error("plaintext is not utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("malformed host entry")]
    MalformedEntry,
    #[error("decryption produced no data")]
    Empty,
}

fn host_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..HOST_KEY_SEED.len()].copy_from_slice(HOST_KEY_SEED);
    key
}

fn cbc_encrypt(key: &[u8; 32], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

fn cbc_decrypt(key: &[u8; 32], iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
    if ciphertext.is_empty() {
        return Err(CodecError::Padding);
    }
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CodecError::Padding)
}

fn md5_hex(input: &[u8]) -> String {
    hex::encode(Md5::digest(input))
}

/// Current wall-clock time in whole seconds.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Signature over `timestamp ++ ciphertext ++ SIGN_KEY`.
pub fn sign(timestamp: u64, ciphertext: &str) -> String {
    md5_hex(format!("{timestamp}{ciphertext}{SIGN_KEY}").as_bytes())
}

/// Encrypt a request payload with the envelope key. Strings are encrypted verbatim, anything else as JSON.
pub fn encrypt_payload(plaintext: &Value) -> String {
    let text = match plaintext {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    STANDARD.encode(cbc_encrypt(REQUEST_KEY, REQUEST_IV, text.as_bytes()))
}

/// Wrap a payload into a signed envelope for the config endpoint.
pub fn encrypt_request(plaintext: &Value, timestamp: u64, client: &str) -> RequestEnvelope {
    let data = encrypt_payload(plaintext);
    let sign = sign(timestamp, &data);
    RequestEnvelope {
        client: client.to_string(),
        timestamp,
        data,
        sign,
    }
}

/// Decrypt an envelope ciphertext. Plaintext that is not JSON comes back as a JSON string.
pub fn decrypt_response(ciphertext: &str) -> Result<Value, CodecError> {
    let raw = STANDARD.decode(ciphertext.trim())?;
    let plain = cbc_decrypt(REQUEST_KEY, REQUEST_IV, &raw)?;
    let text = String::from_utf8(plain)?;
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

/// Decrypt one opaque host entry of the form `base64(iv):base64(ciphertext)`.
pub fn decrypt_host_entry(entry: &str) -> Result<String, CodecError> {
    let (iv_b64, ct_b64) = entry
        .trim()
        .split_once(':')
        .ok_or(CodecError::MalformedEntry)?;
    if iv_b64.is_empty() || ct_b64.is_empty() {
        return Err(CodecError::MalformedEntry);
    }
    let iv: [u8; IV_LEN] = STANDARD
        .decode(iv_b64)?
        .as_slice()
        .try_into()
        .map_err(|_| CodecError::MalformedEntry)?;
    let ciphertext = STANDARD.decode(ct_b64)?;
    let plain = cbc_decrypt(&host_key(), &iv, &ciphertext)?;
    let host = String::from_utf8(plain)?;
    if host.trim().is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(host)
}

/// Produce a host entry for a cloud list, using a fresh random IV.
pub fn encrypt_host_entry(host: &str) -> String {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let ciphertext = cbc_encrypt(&host_key(), &iv, host.as_bytes());
    format!("{}:{}", STANDARD.encode(iv), STANDARD.encode(ciphertext))
}

/// Decrypt a binary asset (e.g. an advert image).
pub fn decrypt_asset(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let plain = cbc_decrypt(ASSET_KEY, ASSET_IV, bytes)?;
    if plain.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(plain)
}

/// Encrypt a binary asset with the asset key.
pub fn encrypt_asset(bytes: &[u8]) -> Vec<u8> {
    cbc_encrypt(ASSET_KEY, ASSET_IV, bytes)
}

/// Device-bound visitor tag: stable hex digest of the device identifier.
pub fn device_tag(device_id: &str) -> String {
    md5_hex(device_id.as_bytes())
}
