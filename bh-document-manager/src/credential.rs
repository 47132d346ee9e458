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

//! This module defines the [`Credential`], a single key bound instance of a document, and the
//! persistence of credentials within the document record.

use bherror::traits::{ErrorContext as _, PropagateError as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    format::DocumentFormat,
    storage::DocumentStore,
    utils::{from_cbor, to_cbor, Bytes},
    DocumentError, Result,
};

/// Prefix of the document store keys under which the credentials are stored.
const CREDENTIAL_KEY_PREFIX: &str = "credential/";

/// The data attached to a credential when the issuer certifies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Certification {
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    issuer_provided_data: Bytes,
}

/// A credential of a document.
///
/// A credential binds one secure area key to the issuer provided data certifying it.  It starts
/// uncertified when the key is created, and becomes usable only after the issuer data has been
/// validated and attached with [`Credential::certify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    alias: String,
    secure_area_identifier: String,
    domain: String,
    format: DocumentFormat,
    sequence: u64,
    usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    certification: Option<Certification>,
}

impl Credential {
    pub(crate) fn new(
        alias: String,
        secure_area_identifier: String,
        domain: String,
        format: DocumentFormat,
        sequence: u64,
    ) -> Self {
        Self {
            alias,
            secure_area_identifier,
            domain,
            format,
            sequence,
            usage_count: 0,
            certification: None,
        }
    }

    /// The alias of the credential key in its secure area.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The identifier of the secure area holding the credential key.
    pub fn secure_area_identifier(&self) -> &str {
        &self.secure_area_identifier
    }

    /// The identifier of the document manager the credential belongs to.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The format of the credential, always the same as the format of its document.
    pub fn format(&self) -> &DocumentFormat {
        &self.format
    }

    /// The position of the credential in the batch it was created in.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// How many times the credential has been used.
    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    /// Whether the issuer data has been attached to the credential.
    pub fn is_certified(&self) -> bool {
        self.certification.is_some()
    }

    /// Start of the validity window, only present once certified.
    pub fn valid_from(&self) -> Option<DateTime<Utc>> {
        self.certification.as_ref().map(|c| c.valid_from)
    }

    /// End of the validity window, only present once certified.
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.certification.as_ref().map(|c| c.valid_until)
    }

    /// The raw issuer data, only present once certified.
    pub fn issuer_provided_data(&self) -> Option<&[u8]> {
        self.certification
            .as_ref()
            .map(|c| c.issuer_provided_data.0.as_slice())
    }

    /// Whether the credential is certified and `at` lies within its validity window, inclusive.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.certification
            .as_ref()
            .is_some_and(|c| c.valid_from <= at && at <= c.valid_until)
    }

    /// Attach the issuer data and the validity window to the credential.
    ///
    /// A certified credential can never be certified again.
    pub(crate) fn certify(
        &mut self,
        issuer_provided_data: Vec<u8>,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Result<()> {
        if self.is_certified() {
            return Err(bherror::Error::root(DocumentError::IllegalState(format!(
                "credential `{}` is already certified",
                self.alias
            ))));
        }

        if valid_until < valid_from {
            return Err(bherror::Error::root(DocumentError::InvalidArgument(
                "validity window ends before it starts".to_owned(),
            ))
            .ctx(format!("valid from {valid_from}, valid until {valid_until}")));
        }

        self.certification = Some(Certification {
            valid_from,
            valid_until,
            issuer_provided_data: issuer_provided_data.into(),
        });

        Ok(())
    }

    pub(crate) fn increment_usage_count(&mut self) {
        self.usage_count += 1;
    }
}

/// Access to the credentials of a single document record.
pub(crate) struct CredentialStore<'a> {
    store: &'a dyn DocumentStore,
    document_id: &'a str,
}

impl<'a> CredentialStore<'a> {
    pub(crate) fn new(store: &'a dyn DocumentStore, document_id: &'a str) -> Self {
        Self { store, document_id }
    }

    /// All the credentials of the document, ordered by their creation sequence.
    pub(crate) async fn list(&self) -> Result<Vec<Credential>> {
        let keys = self
            .store
            .keys(self.document_id)
            .await
            .match_err(DocumentError::from_storage)?;

        let mut credentials = Vec::new();
        for alias in keys
            .iter()
            .filter_map(|key| key.strip_prefix(CREDENTIAL_KEY_PREFIX))
        {
            if let Some(credential) = self.get(alias).await? {
                credentials.push(credential);
            }
        }

        credentials.sort_by_key(Credential::sequence);
        Ok(credentials)
    }

    pub(crate) async fn get(&self, alias: &str) -> Result<Option<Credential>> {
        let key = credential_key(alias);

        let Some(bytes) = self
            .store
            .get(self.document_id, &key)
            .await
            .match_err(DocumentError::from_storage)?
        else {
            return Ok(None);
        };

        from_cbor(&bytes)
            .map(Some)
            .ctx(|| format!("decoding credential `{alias}`"))
    }

    pub(crate) async fn put(&self, credential: &Credential) -> Result<()> {
        let bytes = to_cbor(credential)?;

        self.store
            .put(self.document_id, &credential_key(&credential.alias), bytes)
            .await
            .match_err(DocumentError::from_storage)
    }

    pub(crate) async fn remove(&self, alias: &str) -> Result<bool> {
        self.store
            .remove(self.document_id, &credential_key(alias))
            .await
            .match_err(DocumentError::from_storage)
    }
}

fn credential_key(alias: &str) -> String {
    format!("{CREDENTIAL_KEY_PREFIX}{alias}")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration;

    use super::*;
    use crate::storage::InMemoryStorage;

    fn credential(alias: &str, sequence: u64) -> Credential {
        Credential::new(
            alias.to_owned(),
            "software".to_owned(),
            "manager".to_owned(),
            DocumentFormat::mso_mdoc("org.iso.18013.5.1.mDL"),
            sequence,
        )
    }

    #[test]
    fn uncertified_credential_has_no_validity() {
        let credential = credential("key-0", 0);

        assert!(!credential.is_certified());
        assert_eq!(credential.valid_from(), None);
        assert_eq!(credential.issuer_provided_data(), None);
        assert!(!credential.is_valid_at(Utc::now()));
    }

    #[test]
    fn validity_window_is_inclusive() {
        let from = Utc::now();
        let until = from + Duration::days(1);
        let mut credential = credential("key-0", 0);

        credential.certify(vec![1, 2, 3], from, until).unwrap();

        assert!(credential.is_valid_at(from));
        assert!(credential.is_valid_at(until));
        assert!(!credential.is_valid_at(from - Duration::seconds(1)));
        assert!(!credential.is_valid_at(until + Duration::seconds(1)));
        assert_eq!(credential.issuer_provided_data(), Some([1, 2, 3].as_slice()));
    }

    #[test]
    fn certified_credential_cannot_be_certified_again() {
        let now = Utc::now();
        let mut credential = credential("key-0", 0);
        credential.certify(vec![1], now, now).unwrap();

        let err = credential.certify(vec![2], now, now).unwrap_err();

        assert_matches!(err.error, DocumentError::IllegalState(_));
        assert_eq!(credential.issuer_provided_data(), Some([1].as_slice()));
    }

    #[test]
    fn inverted_validity_window_is_rejected() {
        let now = Utc::now();
        let mut credential = credential("key-0", 0);

        let err = credential
            .certify(vec![1], now, now - Duration::days(1))
            .unwrap_err();

        assert_matches!(err.error, DocumentError::InvalidArgument(_));
        assert!(!credential.is_certified());
    }

    #[tokio::test]
    async fn credentials_are_listed_in_creation_order() {
        let store = InMemoryStorage::new().scoped("manager");
        store.create_document("doc").await.unwrap();
        store.put("doc", "metadata", vec![0]).await.unwrap();
        let credentials = CredentialStore::new(&store, "doc");

        // the aliases sort the other way around
        credentials.put(&credential("b", 0)).await.unwrap();
        credentials.put(&credential("a", 1)).await.unwrap();

        let listed = credentials.list().await.unwrap();
        assert_eq!(
            listed.iter().map(Credential::alias).collect::<Vec<_>>(),
            ["b", "a"]
        );

        assert!(credentials.remove("b").await.unwrap());
        assert_eq!(credentials.get("b").await.unwrap(), None);
        assert_eq!(credentials.list().await.unwrap().len(), 1);
    }
}
