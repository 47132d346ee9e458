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

//! This module defines the interface of a secure area, the external backend which creates and
//! holds the private keys of credentials.
//!
//! The private key material never leaves the secure area.  The crate only ever refers to keys by
//! their alias, and asks the secure area to sign or perform key agreement on its behalf.

use std::{collections::HashMap, fmt, sync::Arc};

use bh_jws_utils::{JwkPublic, SigningAlgorithm};
use futures::future::BoxFuture;

/// Error type returned by [`SecureArea`] implementations.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum SecureAreaError {
    /// The key requires unlock data (e.g. user authentication) which was missing or wrong.
    #[strum(to_string = "Key is locked")]
    KeyLocked,

    /// The key was invalidated, e.g. because biometrics were re-enrolled.
    #[strum(to_string = "Key has been invalidated")]
    KeyInvalidated,

    /// There is no key with the given alias.
    #[strum(to_string = "Key `{0}` not found")]
    KeyNotFound(String),

    /// The provided [`CreateKeySettings`] are not supported by the secure area.
    #[strum(to_string = "Unsupported key settings")]
    InvalidSettings,

    /// Any other failure of the secure area.
    #[strum(to_string = "Secure area operation failed")]
    Operation,
}

impl bherror::BhError for SecureAreaError {}

/// Result type used by the [`SecureArea`] interface.
pub type SecureAreaResult<T> = bherror::Result<T, SecureAreaError>;

/// Opaque data used to unlock a key, e.g. a passphrase or an authentication token.
#[derive(Clone, PartialEq, Eq)]
pub struct UnlockData(Vec<u8>);

impl UnlockData {
    /// Wrap the given bytes as [`UnlockData`].
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(data.into())
    }

    /// The raw unlock data.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for UnlockData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnlockData(..)")
    }
}

/// Secure area specific settings used when creating keys.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateKeySettings {
    algorithm: SigningAlgorithm,
    attestation_challenge: Option<Vec<u8>>,
    user_authentication_required: bool,
    options: serde_json::Map<String, serde_json::Value>,
}

impl Default for CreateKeySettings {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::Es256,
            attestation_challenge: None,
            user_authentication_required: false,
            options: serde_json::Map::new(),
        }
    }
}

impl CreateKeySettings {
    /// Set the signing algorithm of the created keys.
    pub fn with_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the challenge to be included in the key attestation.
    pub fn with_attestation_challenge(mut self, challenge: impl Into<Vec<u8>>) -> Self {
        self.attestation_challenge = Some(challenge.into());
        self
    }

    /// Require user authentication before each use of the created keys.
    pub fn with_user_authentication_required(mut self, required: bool) -> Self {
        self.user_authentication_required = required;
        self
    }

    /// Set an implementation specific option.
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// The signing algorithm of the created keys.
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// The key attestation challenge, if any.
    pub fn attestation_challenge(&self) -> Option<&[u8]> {
        self.attestation_challenge.as_deref()
    }

    /// Whether the created keys require user authentication.
    pub fn user_authentication_required(&self) -> bool {
        self.user_authentication_required
    }

    /// Implementation specific options.
    pub fn options(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.options
    }
}

/// Public information about a key held by a [`SecureArea`].
#[derive(Debug, Clone, PartialEq)]
pub struct KeyInfo {
    /// The alias under which the key is held.
    pub alias: String,
    /// The public key in the JWK format.
    pub public_key: JwkPublic,
    /// The algorithm the key signs with.
    pub algorithm: SigningAlgorithm,
}

/// The result of [`SecureArea::batch_create_key`].
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBatch {
    /// The created keys, in creation order.
    pub keys: Vec<KeyInfo>,
    /// Attestation covering the whole batch, if the secure area supports it.
    pub attestation: Option<Vec<u8>>,
}

/// An external backend which creates, holds and uses private keys.
///
/// The methods return boxed futures so that secure areas of different types can be registered
/// side by side in a [`SecureAreaRepository`].
///
/// Implementations are expected to report [`SecureAreaError::KeyLocked`] when unlock data is
/// required but missing or wrong, and [`SecureAreaError::KeyInvalidated`] when the key can never
/// be used again.
pub trait SecureArea: Send + Sync {
    /// The identifier under which the secure area is registered.
    fn identifier(&self) -> &str;

    /// Create `count` keys at once.
    ///
    /// Hardware backed implementations can attest the whole batch with a single attestation,
    /// which is why keys are never created one by one.
    fn batch_create_key<'a>(
        &'a self,
        count: usize,
        settings: &'a CreateKeySettings,
    ) -> BoxFuture<'a, SecureAreaResult<KeyBatch>>;

    /// Return the public information about the key.
    fn get_key_info<'a>(&'a self, alias: &'a str) -> BoxFuture<'a, SecureAreaResult<KeyInfo>>;

    /// Sign `data` with the key, returning the signature.
    fn sign<'a>(
        &'a self,
        alias: &'a str,
        data: &'a [u8],
        unlock_data: Option<&'a UnlockData>,
    ) -> BoxFuture<'a, SecureAreaResult<Vec<u8>>>;

    /// Perform key agreement between the key and `other_public_key`, returning the shared secret.
    fn key_agreement<'a>(
        &'a self,
        alias: &'a str,
        other_public_key: &'a JwkPublic,
        unlock_data: Option<&'a UnlockData>,
    ) -> BoxFuture<'a, SecureAreaResult<Vec<u8>>>;

    /// Whether the key has been invalidated.
    fn get_key_invalidated<'a>(&'a self, alias: &'a str) -> BoxFuture<'a, SecureAreaResult<bool>>;

    /// Delete the key, returning a proof of deletion if the secure area can produce one.
    fn delete_key<'a>(&'a self, alias: &'a str)
        -> BoxFuture<'a, SecureAreaResult<Option<Vec<u8>>>>;
}

/// A registry of [`SecureArea`]s keyed by their identifier.
#[derive(Clone, Default)]
pub struct SecureAreaRepository {
    secure_areas: HashMap<String, Arc<dyn SecureArea>>,
}

impl SecureAreaRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the secure area, replacing any previous one with the same identifier.
    pub fn register(&mut self, secure_area: Arc<dyn SecureArea>) {
        self.secure_areas
            .insert(secure_area.identifier().to_owned(), secure_area);
    }

    /// Builder-style variant of [`SecureAreaRepository::register`].
    pub fn with(mut self, secure_area: Arc<dyn SecureArea>) -> Self {
        self.register(secure_area);
        self
    }

    /// Look up the secure area registered under `identifier`.
    pub fn get(&self, identifier: &str) -> Option<Arc<dyn SecureArea>> {
        self.secure_areas.get(identifier).cloned()
    }

    /// Identifiers of all the registered secure areas.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.secure_areas.keys().map(String::as_str)
    }
}

impl fmt::Debug for SecureAreaRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.secure_areas.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_utils::InMemorySecureArea;

    #[test]
    fn repository_resolves_registered_secure_areas() {
        let repository = SecureAreaRepository::new()
            .with(Arc::new(InMemorySecureArea::new("software")))
            .with(Arc::new(InMemorySecureArea::new("hardware")));

        assert_eq!(
            repository.get("software").map(|area| area.identifier().to_owned()),
            Some("software".to_owned())
        );
        assert!(repository.get("cloud").is_none());

        let mut identifiers: Vec<_> = repository.identifiers().collect();
        identifiers.sort_unstable();
        assert_eq!(identifiers, ["hardware", "software"]);
    }

    #[test]
    fn unlock_data_is_not_printed() {
        let unlock_data = UnlockData::new(b"1234".to_vec());

        assert_eq!(format!("{unlock_data:?}"), "UnlockData(..)");
        assert_eq!(unlock_data.as_bytes(), b"1234");
    }

    #[test]
    fn create_key_settings_defaults_to_es256() {
        let settings = CreateKeySettings::default()
            .with_attestation_challenge(b"challenge".to_vec())
            .with_option("strongBox", serde_json::Value::Bool(true));

        assert_eq!(settings.algorithm(), SigningAlgorithm::Es256);
        assert_eq!(settings.attestation_challenge(), Some(b"challenge".as_slice()));
        assert!(!settings.user_authentication_required());
        assert_eq!(
            settings.options().get("strongBox"),
            Some(&serde_json::Value::Bool(true))
        );
    }
}
