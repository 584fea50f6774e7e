//! Key recognition and Sui address derivation
//!
//! A credential string is matched against a fixed, ordered list of formats.
//! The first format whose predicate accepts the input decodes it; the
//! mnemonic format accepts everything and is always tried last.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ed25519_dalek::{Signer, SigningKey};
use hmac::{Hmac, Mac};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::Sha512;

use crate::error::{Error, Result};

type Blake2b256 = Blake2b<U32>;
type HmacSha512 = Hmac<Sha512>;

/// Signature scheme flag for Ed25519 in Sui
const ED25519_FLAG: u8 = 0x00;

/// Bech32 human-readable part of exported Sui private keys
const SUI_PRIVKEY_HRP: &str = "suiprivkey";

/// Default Sui derivation path m/44'/784'/0'/0'/0'
const SUI_DERIVATION_PATH: [u32; 5] = [44, 784, 0, 0, 0];

const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Intent prefix for transaction data: scope, version, app id
const TRANSACTION_INTENT: [u8; 3] = [0, 0, 0];

lazy_static! {
    static ref HEX_KEY: Regex = Regex::new(r"^[0-9a-fA-F]{64}$").unwrap();
    static ref BASE64_KEY: Regex = Regex::new(r"^[A-Za-z0-9+/=]+$").unwrap();
}

/// Stable wallet address derived from a credential
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletIdentity(String);

impl WalletIdentity {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Placeholder identity for a credential that could not be decoded.
    ///
    /// Uses the 1-based position in the credential list so the secret itself
    /// never reaches logs or the failed-units file.
    pub fn unresolved(position: usize) -> Self {
        Self(format!("unresolved-wallet-{}", position))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for WalletIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supported credential encodings, in recognition priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// `suiprivkey1…` Bech32 export
    Bech32,
    /// 32-byte secret as hex, optionally `0x`-prefixed
    Hex,
    /// 32-byte secret (or flag + secret) as 44-char base64
    Base64,
    /// BIP-39 phrase
    Mnemonic,
}

impl KeyFormat {
    pub const PRIORITY: [KeyFormat; 4] = [
        KeyFormat::Bech32,
        KeyFormat::Hex,
        KeyFormat::Base64,
        KeyFormat::Mnemonic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KeyFormat::Bech32 => "bech32",
            KeyFormat::Hex => "hex",
            KeyFormat::Base64 => "base64",
            KeyFormat::Mnemonic => "mnemonic",
        }
    }

    /// Predicate half of the recognizer
    pub fn matches(&self, input: &str) -> bool {
        match self {
            KeyFormat::Bech32 => input.starts_with(SUI_PRIVKEY_HRP),
            KeyFormat::Hex => input.starts_with("0x") || HEX_KEY.is_match(input),
            KeyFormat::Base64 => input.len() == 44 && BASE64_KEY.is_match(input),
            KeyFormat::Mnemonic => true,
        }
    }

    /// First format in priority order that accepts `input`
    pub fn detect(input: &str) -> KeyFormat {
        Self::PRIORITY
            .into_iter()
            .find(|format| format.matches(input))
            .unwrap_or(KeyFormat::Mnemonic)
    }

    /// Decoder half of the recognizer: returns the 32-byte Ed25519 secret
    pub fn decode(&self, input: &str) -> Result<[u8; 32]> {
        match self {
            KeyFormat::Bech32 => decode_bech32(input),
            KeyFormat::Hex => {
                let raw = input.strip_prefix("0x").unwrap_or(input);
                let bytes = hex::decode(raw).map_err(|e| self.invalid(e.to_string()))?;
                self.secret_from_bytes(&bytes)
            }
            KeyFormat::Base64 => {
                let bytes = BASE64
                    .decode(input)
                    .map_err(|e| self.invalid(e.to_string()))?;
                self.secret_from_bytes(&bytes)
            }
            KeyFormat::Mnemonic => {
                let mnemonic = bip39::Mnemonic::parse_normalized(&input.to_lowercase())
                    .map_err(|e| self.invalid(e.to_string()))?;
                let seed = mnemonic.to_seed_normalized("");
                derive_ed25519(&seed, &SUI_DERIVATION_PATH)
            }
        }
    }

    fn secret_from_bytes(&self, bytes: &[u8]) -> Result<[u8; 32]> {
        let secret = match bytes.len() {
            32 => bytes,
            33 if bytes[0] == ED25519_FLAG => &bytes[1..],
            33 => return Err(self.invalid("only Ed25519 keys are supported".to_string())),
            n => return Err(self.invalid(format!("expected 32 bytes, got {}", n))),
        };
        let mut out = [0u8; 32];
        out.copy_from_slice(secret);
        Ok(out)
    }

    fn invalid(&self, reason: String) -> Error {
        Error::InvalidKey {
            format: self.name(),
            reason,
        }
    }
}

fn decode_bech32(input: &str) -> Result<[u8; 32]> {
    let format = KeyFormat::Bech32;
    let (hrp, data) = bech32::decode(input).map_err(|e| format.invalid(e.to_string()))?;
    if hrp.to_lowercase() != SUI_PRIVKEY_HRP {
        return Err(format.invalid(format!("unexpected prefix {}", hrp)));
    }
    if data.len() != 33 {
        return Err(format.invalid(format!("expected 33 bytes, got {}", data.len())));
    }
    format.secret_from_bytes(&data)
}

/// SLIP-0010 Ed25519 derivation; every path segment is hardened.
fn derive_ed25519(seed: &[u8], path: &[u32]) -> Result<[u8; 32]> {
    let (mut key, mut chain_code) = hmac_split(b"ed25519 seed", &[seed])?;

    for index in path {
        let hardened = (index | HARDENED_OFFSET).to_be_bytes();
        let (k, c) = hmac_split(&chain_code, &[&[0u8][..], &key[..], &hardened[..]])?;
        key = k;
        chain_code = c;
    }

    Ok(key)
}

fn hmac_split(key: &[u8], parts: &[&[u8]]) -> Result<([u8; 32], [u8; 32])> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|e| Error::Internal(format!("HMAC init failed: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    let out = mac.finalize().into_bytes();

    let mut left = [0u8; 32];
    let mut right = [0u8; 32];
    left.copy_from_slice(&out[..32]);
    right.copy_from_slice(&out[32..]);
    Ok((left, right))
}

/// Decoded wallet: address plus signing capability
pub struct WalletKey {
    identity: WalletIdentity,
    signing_key: SigningKey,
}

impl WalletKey {
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let identity = address_for(&signing_key.verifying_key().to_bytes());
        Self {
            identity,
            signing_key,
        }
    }

    pub fn identity(&self) -> &WalletIdentity {
        &self.identity
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign transaction bytes with the transaction intent.
    ///
    /// Returns the base64 `flag || signature || public key` form expected by
    /// `sui_executeTransactionBlock`.
    pub fn sign_transaction(&self, tx_bytes: &[u8]) -> String {
        let digest = Blake2b256::new()
            .chain_update(TRANSACTION_INTENT)
            .chain_update(tx_bytes)
            .finalize();
        let signature = self.signing_key.sign(&digest);

        let mut serialized = Vec::with_capacity(1 + 64 + 32);
        serialized.push(ED25519_FLAG);
        serialized.extend_from_slice(&signature.to_bytes());
        serialized.extend_from_slice(&self.public_key());
        BASE64.encode(serialized)
    }
}

impl fmt::Debug for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletKey")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Sui address: Blake2b-256 over scheme flag and public key
fn address_for(public_key: &[u8; 32]) -> WalletIdentity {
    let hash = Blake2b256::new()
        .chain_update([ED25519_FLAG])
        .chain_update(public_key)
        .finalize();
    WalletIdentity::new(format!("0x{}", hex::encode(hash)))
}

/// Resolves a credential string into a usable wallet
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, credential: &str) -> Result<WalletKey>;
}

/// Resolver for the credential formats accepted by Sui tooling
#[derive(Debug, Default, Clone, Copy)]
pub struct SuiKeyResolver;

impl KeyResolver for SuiKeyResolver {
    fn resolve(&self, credential: &str) -> Result<WalletKey> {
        let credential = credential.trim();
        let format = KeyFormat::detect(credential);
        let secret = format.decode(credential)?;
        Ok(WalletKey::from_secret(&secret))
    }
}
