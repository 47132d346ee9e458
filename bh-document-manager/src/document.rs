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

//! This module defines the document handles returned by the [`DocumentManager`].
//!
//! A document is in exactly one of the states of [`DocumentState`], and each state has its own
//! handle type exposing the operations which make sense in that state:
//!
//! - [`UnsignedDocument`] exposes the credential keys, so that the issuer can bind the
//!   credentials to them;
//! - [`DeferredDocument`] additionally holds the data of a deferred issuance;
//! - [`IssuedDocument`] can be used to sign and perform key agreement with its credentials.
//!
//! A handle is a snapshot of the document metadata at the time it was returned.  The
//! credentials are always read from the store.
//!
//! [`DocumentManager`]: crate::DocumentManager

use std::{fmt, ops::Deref, sync::Arc};

use bh_jws_utils::{JwkPublic, SigningAlgorithm};
use bherror::traits::{ErrorContext as _, PropagateError as _};
use chrono::{DateTime, Utc};

use crate::{
    credential::{Credential, CredentialStore},
    format::DocumentFormat,
    lock::LockTable,
    metadata::{DocumentMetadata, DocumentState, METADATA_KEY},
    policy::CredentialPolicy,
    secure_area::{KeyInfo, SecureArea, SecureAreaError, SecureAreaRepository, UnlockData},
    storage::DocumentStore,
    DocumentError, Result,
};

/// State shared by the manager and all the document handles it returned.
pub(crate) struct ManagerContext {
    pub(crate) identifier: String,
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) secure_areas: SecureAreaRepository,
    pub(crate) locks: LockTable,
}

impl ManagerContext {
    pub(crate) fn secure_area(&self, identifier: &str) -> Result<Arc<dyn SecureArea>> {
        self.secure_areas.get(identifier).ok_or_else(|| {
            bherror::Error::root(DocumentError::NotFound(format!(
                "secure area `{identifier}`"
            )))
        })
    }

    pub(crate) fn credentials<'a>(&'a self, document_id: &'a str) -> CredentialStore<'a> {
        CredentialStore::new(self.store.as_ref(), document_id)
    }

    /// Read the metadata of the document, if it exists and belongs to this manager.
    pub(crate) async fn find_metadata(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentMetadata>> {
        let Some(bytes) = self
            .store
            .get(document_id, METADATA_KEY)
            .await
            .match_err(DocumentError::from_storage)?
        else {
            return Ok(None);
        };

        let metadata = DocumentMetadata::from_bytes(&bytes)
            .ctx(|| format!("document `{document_id}`"))?;

        if metadata.document_manager_id() != self.identifier {
            tracing::warn!(
                document_id,
                owner = metadata.document_manager_id(),
                "Ignoring a document of another manager"
            );
            return Ok(None);
        }

        Ok(Some(metadata))
    }

    /// Read the metadata of the document, failing with [`DocumentError::NotFound`] if it doesn't
    /// exist or belongs to another manager.
    pub(crate) async fn load_metadata(&self, document_id: &str) -> Result<DocumentMetadata> {
        self.find_metadata(document_id).await?.ok_or_else(|| {
            bherror::Error::root(DocumentError::NotFound(format!(
                "document `{document_id}`"
            )))
        })
    }

    pub(crate) async fn save_metadata(
        &self,
        document_id: &str,
        metadata: &DocumentMetadata,
    ) -> Result<()> {
        self.store
            .put(document_id, METADATA_KEY, metadata.to_bytes()?)
            .await
            .match_err(DocumentError::from_storage)
    }
}

/// The data common to the documents in all the states.
#[derive(Clone)]
pub struct DocumentCore {
    context: Arc<ManagerContext>,
    id: String,
    metadata: DocumentMetadata,
}

impl fmt::Debug for DocumentCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentCore")
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl DocumentCore {
    pub(crate) fn new(
        context: Arc<ManagerContext>,
        id: String,
        metadata: DocumentMetadata,
    ) -> Self {
        Self {
            context,
            id,
            metadata,
        }
    }

    /// The identifier of the document, unique within its manager.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The metadata of the document.
    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    /// The lifecycle state of the document.
    pub fn state(&self) -> DocumentState {
        self.metadata.state()
    }

    /// The format of the document.
    pub fn format(&self) -> &DocumentFormat {
        self.metadata.format()
    }

    /// The identifier of the document manager owning the document.
    pub fn document_manager_id(&self) -> &str {
        self.metadata.document_manager_id()
    }

    /// The display name of the document.
    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    /// When the document was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.metadata.created_at()
    }

    /// The policy applied to the credentials after each use.
    pub fn credential_policy(&self) -> CredentialPolicy {
        self.metadata.credential_policy()
    }

    /// Opaque issuer metadata provided when the document was created.
    pub fn issuer_metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.issuer_metadata()
    }

    /// Current snapshot of the credentials of the document, in creation order.
    pub async fn credentials(&self) -> Result<Vec<Credential>> {
        self.context.credentials(&self.id).list().await
    }
}

/// A document whose credentials are still waiting for the issuer.
#[derive(Debug, Clone)]
pub struct UnsignedDocument(DocumentCore);

impl Deref for UnsignedDocument {
    type Target = DocumentCore;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl UnsignedDocument {
    pub(crate) fn new(core: DocumentCore) -> Self {
        Self(core)
    }

    /// The attestation of the credential keys, if the secure area provided one.
    pub fn key_attestation(&self) -> Option<&[u8]> {
        self.metadata.key_attestation()
    }

    /// The credentials which have not been certified yet.
    pub async fn pending_credentials(&self) -> Result<Vec<Credential>> {
        let mut credentials = self.credentials().await?;
        credentials.retain(|credential| !credential.is_certified());
        Ok(credentials)
    }

    /// Signers proving the possession of the keys of the pending credentials, one per
    /// credential.
    ///
    /// Their signatures are not counted as credential uses.
    pub async fn proof_of_possession_signers(&self) -> Result<Vec<ProofOfPossessionSigner>> {
        let mut signers = Vec::new();

        for credential in self.pending_credentials().await? {
            let secure_area = self
                .context
                .secure_area(credential.secure_area_identifier())?;
            let key_info = secure_area
                .get_key_info(credential.alias())
                .await
                .match_err(DocumentError::from_secure_area)?;

            signers.push(ProofOfPossessionSigner {
                key_info,
                secure_area,
            });
        }

        Ok(signers)
    }
}

/// A document whose issuance has been deferred by the issuer.
///
/// It dereferences to [`UnsignedDocument`], so it can be passed to
/// [`DocumentManager::store_issued_document`] once the issuer provides the credentials.
///
/// [`DocumentManager::store_issued_document`]: crate::DocumentManager::store_issued_document
#[derive(Debug, Clone)]
pub struct DeferredDocument(UnsignedDocument);

impl Deref for DeferredDocument {
    type Target = UnsignedDocument;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DeferredDocument {
    pub(crate) fn new(core: DocumentCore) -> Self {
        Self(UnsignedDocument(core))
    }

    /// The data related to the deferred issuance, e.g. the transaction identifier.
    pub fn related_data(&self) -> &[u8] {
        self.metadata.deferred_related_data().unwrap_or_default()
    }
}

/// The result of an operation with a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumed<T> {
    /// The alias of the used credential.
    pub alias: String,
    /// The result of the operation.
    pub value: T,
}

#[derive(Clone, Copy)]
enum Operation<'a> {
    Sign(&'a [u8]),
    KeyAgreement(&'a JwkPublic),
}

/// A document with certified credentials.
#[derive(Debug, Clone)]
pub struct IssuedDocument(DocumentCore);

impl Deref for IssuedDocument {
    type Target = DocumentCore;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl IssuedDocument {
    pub(crate) fn new(core: DocumentCore) -> Self {
        Self(core)
    }

    /// When the document was issued.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.issued_at()
    }

    /// The raw issuer data of the first certified credential.
    pub fn issuer_provided_data(&self) -> Option<&[u8]> {
        self.metadata.issuer_provided_data()
    }

    /// Find the credential to be used at `at`.
    ///
    /// Of the certified credentials valid at `at` which the policy allows to use and whose key
    /// is not invalidated, the least used one is returned.  Ties go to the earliest created
    /// credential.
    pub async fn find_credential(&self, at: DateTime<Utc>) -> Result<Option<Credential>> {
        let policy = self.credential_policy();
        let mut found: Option<Credential> = None;

        for credential in self.credentials().await? {
            let usable = credential.domain() == self.context.identifier
                && policy.allows_use(credential.usage_count())
                && credential.is_valid_at(at);

            if !usable
                || found
                    .as_ref()
                    .is_some_and(|found| found.usage_count() <= credential.usage_count())
            {
                continue;
            }

            if self.is_invalidated(&credential).await? {
                tracing::debug!(alias = credential.alias(), "Skipping an invalidated credential");
                continue;
            }

            found = Some(credential);
        }

        Ok(found)
    }

    /// A key which is gone, e.g. deleted by a concurrent one-time use, counts as invalidated.
    async fn is_invalidated(&self, credential: &Credential) -> Result<bool> {
        let result = self
            .context
            .secure_area(credential.secure_area_identifier())?
            .get_key_invalidated(credential.alias())
            .await;

        match result {
            Err(error)
                if matches!(
                    error.error,
                    SecureAreaError::KeyNotFound(_) | SecureAreaError::KeyInvalidated
                ) =>
            {
                Ok(true)
            }
            result => result.match_err(DocumentError::from_secure_area),
        }
    }

    /// Sign `data` with a credential valid at `at`, and apply the credential policy.
    pub async fn sign(
        &self,
        data: &[u8],
        unlock_data: Option<&UnlockData>,
        at: DateTime<Utc>,
    ) -> Result<Consumed<Vec<u8>>> {
        self.consume(Operation::Sign(data), unlock_data, at).await
    }

    /// Perform key agreement with `other_public_key` using a credential valid at `at`, and apply
    /// the credential policy.
    pub async fn key_agreement(
        &self,
        other_public_key: &JwkPublic,
        unlock_data: Option<&UnlockData>,
        at: DateTime<Utc>,
    ) -> Result<Consumed<Vec<u8>>> {
        self.consume(Operation::KeyAgreement(other_public_key), unlock_data, at)
            .await
    }

    async fn consume(
        &self,
        operation: Operation<'_>,
        unlock_data: Option<&UnlockData>,
        at: DateTime<Utc>,
    ) -> Result<Consumed<Vec<u8>>> {
        let policy = self.credential_policy();
        let credentials = self.context.credentials(&self.id);

        // another consumer may take the selected one-time credential, in which case the
        // selection is repeated
        let attempts = self.metadata.initial_credentials_count() as usize + 1;
        for _ in 0..attempts {
            let Some(selected) = self.find_credential(at).await? else {
                break;
            };

            let _guard = self
                .context
                .locks
                .lock_credential(&self.id, selected.alias())
                .await;

            let Some(credential) = credentials.get(selected.alias()).await? else {
                continue;
            };
            if !policy.allows_use(credential.usage_count()) || !credential.is_valid_at(at) {
                continue;
            }

            let secure_area = self
                .context
                .secure_area(credential.secure_area_identifier())?;
            let alias = credential.alias().to_owned();

            let value = match operation {
                Operation::Sign(data) => secure_area.sign(&alias, data, unlock_data).await,
                Operation::KeyAgreement(other_public_key) => {
                    secure_area
                        .key_agreement(&alias, other_public_key, unlock_data)
                        .await
                }
            }
            .match_err(DocumentError::from_secure_area)
            .ctx(|| format!("using credential `{alias}`"))?;

            policy
                .apply(&credentials, secure_area.as_ref(), credential)
                .await?;

            tracing::info!(document_id = %self.id, alias = %alias, "Credential used");

            return Ok(Consumed { alias, value });
        }

        Err(bherror::Error::root(DocumentError::NoValidCredential)
            .ctx(format!("document `{}` at {at}", self.id)))
    }
}

/// Signer proving the possession of a credential key to the issuer.
pub struct ProofOfPossessionSigner {
    key_info: KeyInfo,
    secure_area: Arc<dyn SecureArea>,
}

impl fmt::Debug for ProofOfPossessionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofOfPossessionSigner")
            .field("key_info", &self.key_info)
            .field("secure_area", &self.secure_area.identifier())
            .finish()
    }
}

impl ProofOfPossessionSigner {
    /// The alias of the credential key.
    pub fn alias(&self) -> &str {
        &self.key_info.alias
    }

    /// The public key in the JWK format.
    pub fn public_key(&self) -> &JwkPublic {
        &self.key_info.public_key
    }

    /// The algorithm the key signs with.
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.key_info.algorithm
    }

    /// Sign `data` with the credential key.
    pub async fn sign(&self, data: &[u8], unlock_data: Option<&UnlockData>) -> Result<Vec<u8>> {
        self.secure_area
            .sign(&self.key_info.alias, data, unlock_data)
            .await
            .match_err(DocumentError::from_secure_area)
    }
}

/// A document in any of the lifecycle states.
#[derive(Debug, Clone)]
pub enum Document {
    /// See [`UnsignedDocument`].
    Unsigned(UnsignedDocument),
    /// See [`DeferredDocument`].
    Deferred(DeferredDocument),
    /// See [`IssuedDocument`].
    Issued(IssuedDocument),
}

impl Document {
    pub(crate) fn from_core(core: DocumentCore) -> Self {
        match core.state() {
            DocumentState::Unsigned => Self::Unsigned(UnsignedDocument::new(core)),
            DocumentState::Deferred => Self::Deferred(DeferredDocument::new(core)),
            DocumentState::Issued => Self::Issued(IssuedDocument::new(core)),
        }
    }

    /// The issued document, if the document is issued.
    pub fn into_issued(self) -> Option<IssuedDocument> {
        match self {
            Self::Issued(document) => Some(document),
            _ => None,
        }
    }

    /// The unsigned document, if the document is neither issued nor deferred.
    pub fn into_unsigned(self) -> Option<UnsignedDocument> {
        match self {
            Self::Unsigned(document) => Some(document),
            _ => None,
        }
    }

    /// The deferred document, if the issuance is deferred.
    pub fn into_deferred(self) -> Option<DeferredDocument> {
        match self {
            Self::Deferred(document) => Some(document),
            _ => None,
        }
    }
}

impl Deref for Document {
    type Target = DocumentCore;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Unsigned(document) => &document.0,
            Self::Deferred(document) => &document.0 .0,
            Self::Issued(document) => &document.0,
        }
    }
}
