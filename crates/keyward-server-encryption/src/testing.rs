// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process stand-ins for HSM and KMS clients used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::cipher::{self, Sealed, KEY_SIZE};
use crate::config::ProviderConfig;
use crate::error::{EncryptionError, EncryptionResult};
use crate::provider::{HsmClient, HsmConnector, HsmKeyHandle, KmsClient, KmsConnector};

#[derive(Default)]
struct HsmState {
	next_handle: u64,
	keys: HashMap<HsmKeyHandle, Zeroizing<[u8; KEY_SIZE]>>,
	aliases: HashMap<String, HsmKeyHandle>,
	pending: Option<(String, usize)>,
	decrypt_failures: VecDeque<EncryptionError>,
}

impl HsmState {
	fn new_key(&mut self) -> HsmKeyHandle {
		self.next_handle += 1;
		let handle = HsmKeyHandle(self.next_handle);
		self.keys.insert(handle, cipher::generate_key());
		handle
	}
}

/// HSM partition backed by software AES keys. Wrong-key decrypts fail the
/// way Luna drivers do, with a block-size error carrying code 0x40.
#[derive(Default)]
pub struct FakeHsm {
	state: Mutex<HsmState>,
	lookups: AtomicUsize,
	generated: AtomicUsize,
	reconnects: AtomicUsize,
}

impl FakeHsm {
	/// Create a key under `alias` directly, as another instance would.
	pub fn install(&self, alias: &str) -> HsmKeyHandle {
		let mut state = self.state.lock().unwrap();
		let handle = state.new_key();
		state.aliases.insert(alias.to_string(), handle);
		handle
	}

	/// Make `alias` appear on the `lookup`-th call to `contains_alias`.
	pub fn publish_after(&self, alias: &str, lookup: usize) {
		self.state.lock().unwrap().pending = Some((alias.to_string(), lookup));
	}

	pub fn fail_next_decrypt(&self, error: EncryptionError) {
		self.state.lock().unwrap().decrypt_failures.push_back(error);
	}

	pub fn alias_lookups(&self) -> usize {
		self.lookups.load(Ordering::SeqCst)
	}

	pub fn generated(&self) -> usize {
		self.generated.load(Ordering::SeqCst)
	}

	pub fn reconnects(&self) -> usize {
		self.reconnects.load(Ordering::SeqCst)
	}

	fn key(&self, handle: HsmKeyHandle) -> EncryptionResult<Zeroizing<[u8; KEY_SIZE]>> {
		self.state
			.lock()
			.unwrap()
			.keys
			.get(&handle)
			.cloned()
			.ok_or_else(|| EncryptionError::provider(format!("no key object {handle:?}")))
	}
}

#[async_trait]
impl HsmClient for FakeHsm {
	async fn contains_alias(&self, alias: &str) -> EncryptionResult<bool> {
		let lookup = self.lookups.fetch_add(1, Ordering::SeqCst) + 1;
		let mut state = self.state.lock().unwrap();
		if let Some((pending, at)) = state.pending.clone() {
			if pending == alias && lookup >= at {
				state.pending = None;
				let handle = state.new_key();
				state.aliases.insert(pending, handle);
			}
		}
		Ok(state.aliases.contains_key(alias))
	}

	async fn get_key(&self, alias: &str) -> EncryptionResult<Option<HsmKeyHandle>> {
		Ok(self.state.lock().unwrap().aliases.get(alias).copied())
	}

	async fn generate_key(&self) -> EncryptionResult<HsmKeyHandle> {
		self.generated.fetch_add(1, Ordering::SeqCst);
		Ok(self.state.lock().unwrap().new_key())
	}

	async fn set_key_entry(&self, alias: &str, key: HsmKeyHandle) -> EncryptionResult<()> {
		self.state
			.lock()
			.unwrap()
			.aliases
			.insert(alias.to_string(), key);
		Ok(())
	}

	async fn encrypt(&self, key: HsmKeyHandle, plaintext: &[u8]) -> EncryptionResult<Sealed> {
		cipher::seal(&*self.key(key)?, plaintext)
	}

	async fn decrypt(
		&self,
		key: HsmKeyHandle,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> EncryptionResult<Zeroizing<Vec<u8>>> {
		if let Some(err) = self.state.lock().unwrap().decrypt_failures.pop_front() {
			return Err(err);
		}
		cipher::open(&*self.key(key)?, ciphertext, nonce).map_err(|err| match err {
			EncryptionError::AuthenticationFailed => EncryptionError::IllegalBlockSize(
				"Function 'C_Decrypt' returns 0x40".to_string(),
			),
			other => other,
		})
	}

	async fn reconnect(&self) -> EncryptionResult<()> {
		self.reconnects.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

/// KMS plugin holding named software keys.
pub struct FakeKms {
	keys: HashMap<String, Zeroizing<[u8; KEY_SIZE]>>,
	decrypt_failures: Mutex<VecDeque<EncryptionError>>,
	reconnects: AtomicUsize,
}

impl FakeKms {
	pub fn with_keys(names: &[&str]) -> Self {
		Self {
			keys: names
				.iter()
				.map(|name| (name.to_string(), cipher::generate_key()))
				.collect(),
			decrypt_failures: Mutex::new(VecDeque::new()),
			reconnects: AtomicUsize::new(0),
		}
	}

	pub fn fail_next_decrypt(&self, error: EncryptionError) {
		self.decrypt_failures.lock().unwrap().push_back(error);
	}

	pub fn reconnects(&self) -> usize {
		self.reconnects.load(Ordering::SeqCst)
	}

	fn key(&self, name: &str) -> EncryptionResult<&Zeroizing<[u8; KEY_SIZE]>> {
		self.keys
			.get(name)
			.ok_or_else(|| EncryptionError::provider(format!("unknown KMS key {name}")))
	}
}

#[async_trait]
impl KmsClient for FakeKms {
	async fn encrypt(&self, key_name: &str, plaintext: &[u8]) -> EncryptionResult<Sealed> {
		cipher::seal(self.key(key_name)?, plaintext)
	}

	async fn decrypt(
		&self,
		key_name: &str,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> EncryptionResult<Zeroizing<Vec<u8>>> {
		if let Some(err) = self.decrypt_failures.lock().unwrap().pop_front() {
			return Err(err);
		}
		cipher::open(self.key(key_name)?, ciphertext, nonce)
	}

	async fn reconnect(&self) -> EncryptionResult<()> {
		self.reconnects.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

/// Connector handing out one shared [`FakeHsm`] and counting connections.
#[derive(Default)]
pub struct FakeHsmConnector {
	pub hsm: Arc<FakeHsm>,
	pub connections: AtomicUsize,
}

#[async_trait]
impl HsmConnector for FakeHsmConnector {
	async fn connect(&self, _provider: &ProviderConfig) -> EncryptionResult<Arc<dyn HsmClient>> {
		self.connections.fetch_add(1, Ordering::SeqCst);
		Ok(Arc::clone(&self.hsm) as Arc<dyn HsmClient>)
	}
}

pub struct FakeKmsConnector {
	pub kms: Arc<FakeKms>,
	pub connections: AtomicUsize,
}

impl FakeKmsConnector {
	pub fn new(kms: FakeKms) -> Self {
		Self {
			kms: Arc::new(kms),
			connections: AtomicUsize::new(0),
		}
	}
}

#[async_trait]
impl KmsConnector for FakeKmsConnector {
	async fn connect(&self, _provider: &ProviderConfig) -> EncryptionResult<Arc<dyn KmsClient>> {
		self.connections.fetch_add(1, Ordering::SeqCst);
		Ok(Arc::clone(&self.kms) as Arc<dyn KmsClient>)
	}
}
