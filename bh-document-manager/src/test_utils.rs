// Copyright (C) 2020-2026  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Test doubles of the external collaborators and issuer fixtures.
//!
//! Enabled with the `test-utils` feature.

mod fixtures;
mod symbolic_crypto;

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use bh_jws_utils::JwkPublic;
pub use fixtures::{mdoc_issuer_signed, SdJwtVcFixture};
use futures::{future::BoxFuture, FutureExt as _};
use serde_json::json;
pub use symbolic_crypto::random_public_key;
use symbolic_crypto::{shared_secret, SymbolicSignature};

use crate::secure_area::{
    CreateKeySettings, KeyBatch, KeyInfo, SecureArea, SecureAreaError, SecureAreaResult,
    UnlockData,
};

/// The unlock data accepted by keys of the [`InMemorySecureArea`] which require user
/// authentication.
pub const TEST_PIN: &[u8] = b"1234";

struct StoredKey {
    info: KeyInfo,
    user_authentication_required: bool,
    invalidated: bool,
}

#[derive(Default)]
struct State {
    keys: HashMap<String, StoredKey>,
    next_alias: u64,
    batch_calls: usize,
    fail_next_batch: bool,
    short_next_batch: bool,
    sign_calls: usize,
    yields: usize,
}

/// An in-memory [`SecureArea`] with symbolic cryptography.
///
/// Signatures can be checked with [`InMemorySecureArea::verify_signature`], and the key
/// agreement returns the same secret for the same pair of public keys irrespective of the order.
pub struct InMemorySecureArea {
    identifier: String,
    state: Mutex<State>,
}

impl InMemorySecureArea {
    /// Create an empty secure area registered under `identifier`.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            state: Mutex::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next [`SecureArea::batch_create_key`] call fail.
    pub fn fail_next_batch(&self) {
        self.state().fail_next_batch = true;
    }

    /// Make the next [`SecureArea::batch_create_key`] call create one key less than requested.
    pub fn short_next_batch(&self) {
        self.state().short_next_batch = true;
    }

    /// Invalidate the key, e.g. as if the biometrics were re-enrolled.
    pub fn invalidate(&self, alias: &str) {
        if let Some(key) = self.state().keys.get_mut(alias) {
            key.invalidated = true;
        }
    }

    /// Whether the key exists.
    pub fn contains(&self, alias: &str) -> bool {
        self.state().keys.contains_key(alias)
    }

    /// Make every key lookup, signature and key agreement yield to the executor `yields` times
    /// before touching the keys, so that concurrent callers interleave.
    pub fn yield_before_use(&self, yields: usize) {
        self.state().yields = yields;
    }

    /// Number of the existing keys.
    pub fn key_count(&self) -> usize {
        self.state().keys.len()
    }

    /// Number of the [`SecureArea::batch_create_key`] calls so far.
    pub fn batch_calls(&self) -> usize {
        self.state().batch_calls
    }

    /// Number of the successful [`SecureArea::sign`] calls so far.
    pub fn sign_calls(&self) -> usize {
        self.state().sign_calls
    }

    /// Whether `signature` was produced over `data` by the key with `public_key`.
    pub fn verify_signature(public_key: &JwkPublic, data: &[u8], signature: &[u8]) -> bool {
        SymbolicSignature::verify(signature, data, public_key)
    }

    /// The secret the other party derives from its key and the `public_key` of ours.
    pub fn expected_shared_secret(
        public_key: &JwkPublic,
        other_public_key: &JwkPublic,
    ) -> Vec<u8> {
        shared_secret(public_key, other_public_key)
    }

    fn usable_key(
        &self,
        alias: &str,
        unlock_data: Option<&UnlockData>,
    ) -> SecureAreaResult<KeyInfo> {
        let state = self.state();
        let key = state.keys.get(alias).ok_or_else(|| {
            bherror::Error::root(SecureAreaError::KeyNotFound(alias.to_owned()))
        })?;

        if key.invalidated {
            return Err(bherror::Error::root(SecureAreaError::KeyInvalidated));
        }

        if key.user_authentication_required
            && unlock_data.map(UnlockData::as_bytes) != Some(TEST_PIN)
        {
            return Err(bherror::Error::root(SecureAreaError::KeyLocked));
        }

        Ok(key.info.clone())
    }

    fn after_yields<'a, T, F>(&'a self, operation: F) -> BoxFuture<'a, T>
    where
        T: Send + 'a,
        F: FnOnce() -> T + Send + 'a,
    {
        let yields = self.state().yields;
        async move {
            for _ in 0..yields {
                YieldNow::default().await;
            }
            operation()
        }
        .boxed()
    }

    fn create_keys(
        &self,
        count: usize,
        settings: &CreateKeySettings,
    ) -> SecureAreaResult<KeyBatch> {
        let mut state = self.state();
        state.batch_calls += 1;

        if std::mem::take(&mut state.fail_next_batch) {
            return Err(bherror::Error::root(SecureAreaError::Operation).ctx("injected failure"));
        }

        let count = if std::mem::take(&mut state.short_next_batch) {
            count.saturating_sub(1)
        } else {
            count
        };

        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            let alias = format!("{}-key-{}", self.identifier, state.next_alias);
            state.next_alias += 1;

            let info = KeyInfo {
                alias: alias.clone(),
                public_key: random_public_key(),
                algorithm: settings.algorithm(),
            };
            state.keys.insert(
                alias,
                StoredKey {
                    info: info.clone(),
                    user_authentication_required: settings.user_authentication_required(),
                    invalidated: false,
                },
            );
            keys.push(info);
        }

        let attestation = json!({
            "aliases": keys.iter().map(|key| &key.alias).collect::<Vec<_>>(),
            "challenge": settings.attestation_challenge().map(hex::encode),
        });

        Ok(KeyBatch {
            keys,
            attestation: Some(attestation.to_string().into_bytes()),
        })
    }
}

impl SecureArea for InMemorySecureArea {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn batch_create_key<'a>(
        &'a self,
        count: usize,
        settings: &'a CreateKeySettings,
    ) -> BoxFuture<'a, SecureAreaResult<KeyBatch>> {
        futures::future::ready(self.create_keys(count, settings)).boxed()
    }

    fn get_key_info<'a>(&'a self, alias: &'a str) -> BoxFuture<'a, SecureAreaResult<KeyInfo>> {
        let result = self
            .state()
            .keys
            .get(alias)
            .map(|key| key.info.clone())
            .ok_or_else(|| bherror::Error::root(SecureAreaError::KeyNotFound(alias.to_owned())));
        futures::future::ready(result).boxed()
    }

    fn sign<'a>(
        &'a self,
        alias: &'a str,
        data: &'a [u8],
        unlock_data: Option<&'a UnlockData>,
    ) -> BoxFuture<'a, SecureAreaResult<Vec<u8>>> {
        self.after_yields(move || {
            self.usable_key(alias, unlock_data).map(|key| {
                self.state().sign_calls += 1;
                SymbolicSignature::new(data, &key.public_key).to_bytes()
            })
        })
    }

    fn key_agreement<'a>(
        &'a self,
        alias: &'a str,
        other_public_key: &'a JwkPublic,
        unlock_data: Option<&'a UnlockData>,
    ) -> BoxFuture<'a, SecureAreaResult<Vec<u8>>> {
        self.after_yields(move || {
            self.usable_key(alias, unlock_data)
                .map(|key| shared_secret(&key.public_key, other_public_key))
        })
    }

    fn get_key_invalidated<'a>(&'a self, alias: &'a str) -> BoxFuture<'a, SecureAreaResult<bool>> {
        self.after_yields(move || {
            self.state()
                .keys
                .get(alias)
                .map(|key| key.invalidated)
                .ok_or_else(|| {
                    bherror::Error::root(SecureAreaError::KeyNotFound(alias.to_owned()))
                })
        })
    }

    fn delete_key<'a>(
        &'a self,
        alias: &'a str,
    ) -> BoxFuture<'a, SecureAreaResult<Option<Vec<u8>>>> {
        let result = match self.state().keys.remove(alias) {
            Some(_) => Ok(Some(format!("deleted:{alias}").into_bytes())),
            None => Err(bherror::Error::root(SecureAreaError::KeyNotFound(
                alias.to_owned(),
            ))),
        };
        futures::future::ready(result).boxed()
    }
}

/// Completes on the second poll, after waking its task.
#[derive(Default)]
struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if std::mem::replace(&mut self.yielded, true) {
            return Poll::Ready(());
        }

        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
