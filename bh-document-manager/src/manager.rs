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

use std::{collections::HashMap, fmt, sync::Arc};

use bherror::traits::{ErrorContext as _, PropagateError as _};
use chrono::Utc;

use crate::{
    certification,
    credential::Credential,
    document::{
        DeferredDocument, Document, DocumentCore, IssuedDocument, ManagerContext,
        UnsignedDocument,
    },
    factory::{self, CredentialFactory},
    format::DocumentFormat,
    lock::LockTable,
    metadata::{DocumentMetadata, DocumentState},
    secure_area::{SecureArea, SecureAreaRepository},
    settings::{CertificationOptions, CreateDocumentSettings},
    storage::DocumentStore,
    DocumentError, Result,
};

/// JSON pointer of the display name in the credential issuer metadata, as defined in the
/// `Appendix A` of the [OpenID4VCI][1].
///
/// [1]: <https://openid.net/specs/openid-4-verifiable-credential-issuance-1_0.html>
const DISPLAY_NAME_POINTER: &str = "/display/0/name";

/// The data returned by the issuer for one credential key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerProvidedCredential {
    /// The alias of the credential key the issuer bound the data to.
    pub public_key_alias: String,
    /// The _CBOR_ encoded `IssuerSigned` for `mso_mdoc`, or the Compact SD-JWT for SD-JWT VC.
    pub data: Vec<u8>,
}

impl IssuerProvidedCredential {
    /// Create the issuer data for the credential key `public_key_alias`.
    pub fn new(public_key_alias: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            public_key_alias: public_key_alias.into(),
            data: data.into(),
        }
    }
}

/// Proofs that the keys of a deleted document were deleted by their secure areas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionProof {
    /// The identifier of the deleted document.
    pub document_id: String,
    /// The deletion proofs as returned by the secure areas, along with the key aliases.
    pub proofs: Vec<(String, Vec<u8>)>,
}

/// Filter of the documents returned by [`DocumentManager::get_documents`].
pub type DocumentPredicate<'a> = &'a (dyn Fn(&Document) -> bool + Send + Sync);

/// The entry point for managing the lifecycle of documents.
///
/// All the documents of a manager live in the namespace of its identifier, which is taken from
/// the [`DocumentStore`] the manager is constructed with.  Managers sharing the same storage
/// backend never see each other's documents.
pub struct DocumentManager {
    context: Arc<ManagerContext>,
    certification_options: CertificationOptions,
}

impl fmt::Debug for DocumentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentManager")
            .field("identifier", &self.context.identifier)
            .field("secure_areas", &self.context.secure_areas)
            .field("certification_options", &self.certification_options)
            .finish_non_exhaustive()
    }
}

impl DocumentManager {
    /// Create a manager of the documents in `store`, with credential keys in `secure_areas`.
    pub fn new(store: Arc<dyn DocumentStore>, secure_areas: SecureAreaRepository) -> Self {
        let context = ManagerContext {
            identifier: store.manager_id().to_owned(),
            store,
            secure_areas,
            locks: LockTable::default(),
        };

        Self {
            context: Arc::new(context),
            certification_options: CertificationOptions::default(),
        }
    }

    /// Set the options of the certification of issued credentials.
    pub fn with_certification_options(mut self, options: CertificationOptions) -> Self {
        self.certification_options = options;
        self
    }

    /// The identifier of the manager, also the domain of all its credentials.
    pub fn identifier(&self) -> &str {
        &self.context.identifier
    }

    /// The secure areas available to the manager.
    pub fn secure_area_repository(&self) -> &SecureAreaRepository {
        &self.context.secure_areas
    }

    /// Create a document with `settings.number_of_credentials()` uncertified credentials.
    ///
    /// All the credential keys are created in a single batch.  If anything fails, the created
    /// keys and the document record are removed again.
    pub async fn create_document(
        &self,
        format: DocumentFormat,
        settings: CreateDocumentSettings,
        issuer_metadata: Option<serde_json::Value>,
    ) -> Result<UnsignedDocument> {
        let secure_area = self.context.secure_area(settings.secure_area_identifier())?;
        let document_id = hex::encode(rand::random::<[u8; 16]>());

        self.context
            .store
            .create_document(&document_id)
            .await
            .match_err(DocumentError::from_storage)?;

        let batch = match CredentialFactory::for_format(&format)
            .create_credentials(&format, self.identifier(), secure_area.as_ref(), &settings)
            .await
        {
            Ok(batch) => batch,
            Err(error) => {
                self.discard_record(&document_id).await;
                return Err(error);
            }
        };

        let mut metadata = DocumentMetadata::new(
            self.identifier().to_owned(),
            format,
            settings.number_of_credentials(),
            settings.credential_policy(),
            Utc::now(),
            issuer_metadata,
        );
        metadata.set_key_attestation(batch.attestation);

        if let Err(error) = self
            .persist_new_document(&document_id, &metadata, &batch.credentials)
            .await
        {
            factory::delete_keys(
                secure_area.as_ref(),
                batch.credentials.iter().map(Credential::alias),
            )
            .await;
            self.discard_record(&document_id).await;
            return Err(error);
        }

        tracing::info!(
            document_id = %document_id,
            format = %metadata.format(),
            credentials = batch.credentials.len(),
            "Document created"
        );

        Ok(UnsignedDocument::new(self.core(document_id, metadata)))
    }

    async fn persist_new_document(
        &self,
        document_id: &str,
        metadata: &DocumentMetadata,
        credentials: &[Credential],
    ) -> Result<()> {
        let credential_store = self.context.credentials(document_id);
        for credential in credentials {
            credential_store.put(credential).await?;
        }

        let _guard = self.context.locks.lock_metadata(document_id).await;
        self.context.save_metadata(document_id, metadata).await
    }

    async fn discard_record(&self, document_id: &str) {
        if let Err(error) = self.context.store.delete_document(document_id).await {
            tracing::warn!(document_id, %error, "Failed to discard a document record");
        }
    }

    /// Certify the pending credentials of the document with the data provided by the issuer.
    ///
    /// There must be exactly one entry per pending credential, matched by the key alias.  The
    /// document becomes issued only once every credential is certified; if one of them fails,
    /// the already certified ones stay certified and the call can be retried with the rest.  An
    /// empty list completes a document whose credentials are all certified already.
    ///
    /// The issuer data recorded in the metadata is the one of the earliest created credential.
    pub async fn store_issued_document(
        &self,
        unsigned: &UnsignedDocument,
        issuer_provided_credentials: Vec<IssuerProvidedCredential>,
    ) -> Result<IssuedDocument> {
        self.check_ownership(unsigned)?;
        let document_id = unsigned.id();

        let _guard = self.context.locks.lock_metadata(document_id).await;
        let mut metadata = self.context.load_metadata(document_id).await?;

        if metadata.state() == DocumentState::Issued {
            return Err(bherror::Error::root(DocumentError::IllegalState(format!(
                "document `{document_id}` is already issued"
            ))));
        }

        let credentials = self.context.credentials(document_id);
        let stored = credentials.list().await?;
        let mut pending: HashMap<String, Credential> = stored
            .iter()
            .filter(|credential| !credential.is_certified())
            .map(|credential| (credential.alias().to_owned(), credential.clone()))
            .collect();

        // every credential got certified, but the metadata wasn't saved
        let completes_earlier_issuance =
            !stored.is_empty() && pending.is_empty() && issuer_provided_credentials.is_empty();

        if !completes_earlier_issuance
            && (issuer_provided_credentials.is_empty()
                || issuer_provided_credentials.len() != pending.len())
        {
            return Err(bherror::Error::root(DocumentError::InvalidArgument(
                "credential count mismatch".to_owned(),
            ))
            .ctx(format!(
                "{} pending credentials, {} provided",
                pending.len(),
                issuer_provided_credentials.len()
            )));
        }

        let mut matched = Vec::with_capacity(issuer_provided_credentials.len());
        for provided in &issuer_provided_credentials {
            let credential = pending.remove(&provided.public_key_alias).ok_or_else(|| {
                bherror::Error::root(DocumentError::InvalidArgument(format!(
                    "no pending credential with the alias `{}`",
                    provided.public_key_alias
                )))
            })?;
            matched.push((credential, provided.data.clone()));
        }

        let now = Utc::now();
        for (credential, data) in matched {
            let _credential_guard = self
                .context
                .locks
                .lock_credential(document_id, credential.alias())
                .await;

            let mut credential = credentials.get(credential.alias()).await?.ok_or_else(|| {
                bherror::Error::root(DocumentError::NotFound(format!(
                    "credential `{}`",
                    credential.alias()
                )))
            })?;

            let secure_area = self
                .context
                .secure_area(credential.secure_area_identifier())?;
            let key_info = secure_area
                .get_key_info(credential.alias())
                .await
                .match_err(DocumentError::from_secure_area)?;

            certification::certify(
                &mut credential,
                &key_info.public_key,
                data,
                &self.certification_options,
                now,
            )
            .await
            .ctx(|| format!("document `{document_id}`"))?;

            credentials.put(&credential).await?;
        }

        let first_data = credentials
            .list()
            .await?
            .iter()
            .find(|credential| credential.is_certified())
            .and_then(Credential::issuer_provided_data)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        metadata.mark_issued(display_name(&metadata), first_data, now);
        self.context.save_metadata(document_id, &metadata).await?;

        tracing::info!(document_id, "Document issued");

        Ok(IssuedDocument::new(
            self.core(document_id.to_owned(), metadata),
        ))
    }

    /// Record that the issuer deferred the issuance, along with the data needed to retrieve the
    /// credentials later.  Calling it again replaces the data.
    pub async fn store_deferred_document(
        &self,
        unsigned: &UnsignedDocument,
        related_data: Vec<u8>,
    ) -> Result<DeferredDocument> {
        self.check_ownership(unsigned)?;
        let document_id = unsigned.id();

        let _guard = self.context.locks.lock_metadata(document_id).await;
        let mut metadata = self.context.load_metadata(document_id).await?;

        metadata
            .mark_deferred(display_name(&metadata), related_data)
            .ctx(|| format!("document `{document_id}`"))?;
        self.context.save_metadata(document_id, &metadata).await?;

        tracing::info!(document_id, "Document issuance deferred");

        Ok(DeferredDocument::new(
            self.core(document_id.to_owned(), metadata),
        ))
    }

    /// Delete the document with all its credentials and their keys.
    ///
    /// Returns the deletion proofs of the keys, if the secure areas produce them.
    pub async fn delete_document_by_id(&self, document_id: &str) -> Result<Option<DeletionProof>> {
        let _guard = self.context.locks.lock_metadata(document_id).await;
        self.context.load_metadata(document_id).await?;

        let credentials = self.context.credentials(document_id).list().await?;

        self.context
            .store
            .delete_document(document_id)
            .await
            .match_err(DocumentError::from_storage)?;

        let mut proofs = Vec::new();
        for credential in &credentials {
            let secure_area = match self
                .context
                .secure_area(credential.secure_area_identifier())
            {
                Ok(secure_area) => secure_area,
                Err(error) => {
                    tracing::warn!(alias = credential.alias(), %error, "Key left behind");
                    continue;
                }
            };

            match secure_area.delete_key(credential.alias()).await {
                Ok(Some(proof)) => proofs.push((credential.alias().to_owned(), proof)),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(alias = credential.alias(), %error, "Key left behind");
                }
            }
        }

        tracing::info!(document_id, "Document deleted");

        Ok((!proofs.is_empty()).then(|| DeletionProof {
            document_id: document_id.to_owned(),
            proofs,
        }))
    }

    /// The document with the given identifier.
    pub async fn get_document_by_id(&self, document_id: &str) -> Result<Document> {
        let metadata = self.context.load_metadata(document_id).await?;

        Ok(Document::from_core(
            self.core(document_id.to_owned(), metadata),
        ))
    }

    /// All the documents of the manager, optionally filtered by `predicate`.
    pub async fn get_documents(
        &self,
        predicate: Option<DocumentPredicate<'_>>,
    ) -> Result<Vec<Document>> {
        let document_ids = self
            .context
            .store
            .list_documents()
            .await
            .match_err(DocumentError::from_storage)?;

        let mut documents = Vec::with_capacity(document_ids.len());
        for document_id in document_ids {
            // documents which are still being created have no metadata yet
            let Some(metadata) = self.context.find_metadata(&document_id).await? else {
                continue;
            };

            let document = Document::from_core(self.core(document_id, metadata));
            if predicate.is_none_or(|predicate| predicate(&document)) {
                documents.push(document);
            }
        }

        Ok(documents)
    }

    fn core(&self, document_id: String, metadata: DocumentMetadata) -> DocumentCore {
        DocumentCore::new(self.context.clone(), document_id, metadata)
    }

    fn check_ownership(&self, document: &UnsignedDocument) -> Result<()> {
        if document.document_manager_id() != self.identifier() {
            return Err(bherror::Error::root(DocumentError::InvalidArgument(
                "document belongs to another manager".to_owned(),
            ))
            .ctx(format!("document `{}`", document.id())));
        }

        Ok(())
    }
}

/// The display name from the issuer metadata, or the document type if there is none.
fn display_name(metadata: &DocumentMetadata) -> String {
    metadata
        .issuer_metadata()
        .and_then(|issuer_metadata| issuer_metadata.pointer(DISPLAY_NAME_POINTER))
        .and_then(serde_json::Value::as_str)
        .unwrap_or_else(|| metadata.format().document_type())
        .to_owned()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::{
        policy::CredentialPolicy,
        secure_area::CreateKeySettings,
        storage::InMemoryStorage,
        test_utils::{mdoc_issuer_signed, InMemorySecureArea, SdJwtVcFixture},
    };

    const MDL: &str = "org.iso.18013.5.1.mDL";
    const PID: &str = "urn:eudi:pid:1";

    fn manager(storage: &InMemoryStorage, id: &str) -> (DocumentManager, Arc<InMemorySecureArea>) {
        let secure_area = Arc::new(InMemorySecureArea::new("software"));
        let repository = SecureAreaRepository::new().with(secure_area.clone());

        (
            DocumentManager::new(Arc::new(storage.scoped(id)), repository),
            secure_area,
        )
    }

    fn settings(count: u32, policy: CredentialPolicy) -> CreateDocumentSettings {
        CreateDocumentSettings::new("software", CreateKeySettings::default(), count)
            .unwrap()
            .with_credential_policy(policy)
    }

    async fn mdoc_data(document: &UnsignedDocument) -> Vec<IssuerProvidedCredential> {
        let now = Utc::now();
        document
            .proof_of_possession_signers()
            .await
            .unwrap()
            .iter()
            .map(|signer| {
                IssuerProvidedCredential::new(
                    signer.alias(),
                    mdoc_issuer_signed(
                        MDL,
                        signer.public_key(),
                        now - Duration::days(1),
                        now + Duration::days(30),
                    ),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn created_document_has_uncertified_credentials() {
        let (manager, secure_area) = manager(&InMemoryStorage::new(), "manager");

        let document = manager
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(3, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap();

        assert_eq!(document.state(), DocumentState::Unsigned);
        assert_eq!(document.document_manager_id(), "manager");
        assert!(document.key_attestation().is_some());
        let credentials = document.credentials().await.unwrap();
        assert_eq!(credentials.len(), 3);
        assert!(credentials.iter().all(|c| !c.is_certified()));
        assert_eq!(secure_area.key_count(), 3);
        assert_eq!(secure_area.batch_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_secure_area_is_not_found() {
        let (manager, _) = manager(&InMemoryStorage::new(), "manager");
        let settings =
            CreateDocumentSettings::new("hardware", CreateKeySettings::default(), 1).unwrap();

        let err = manager
            .create_document(DocumentFormat::mso_mdoc(MDL), settings, None)
            .await
            .unwrap_err();

        assert_matches!(err.error, DocumentError::NotFound(_));
        assert!(manager.get_documents(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_key_creation_leaves_nothing_behind() {
        let storage = InMemoryStorage::new();
        let (manager, secure_area) = manager(&storage, "manager");

        secure_area.fail_next_batch();
        let err = manager
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(2, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.error, DocumentError::SecureArea);

        secure_area.short_next_batch();
        let err = manager
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(2, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.error, DocumentError::SecureArea);

        assert!(storage.scoped("manager").list_documents().await.unwrap().is_empty());
        assert_eq!(secure_area.key_count(), 0);
    }

    #[tokio::test]
    async fn mismatched_credential_count_keeps_the_document_unsigned() {
        let (manager, _) = manager(&InMemoryStorage::new(), "manager");
        let document = manager
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(2, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap();
        let mut data = mdoc_data(&document).await;
        data.pop();

        for provided in [vec![], data] {
            let err = manager
                .store_issued_document(&document, provided)
                .await
                .unwrap_err();
            assert_matches!(err.error, DocumentError::InvalidArgument(_));
        }

        let stored = manager.get_document_by_id(document.id()).await.unwrap();
        assert_eq!(stored.state(), DocumentState::Unsigned);
        assert!(stored
            .credentials()
            .await
            .unwrap()
            .iter()
            .all(|c| !c.is_certified()));
    }

    #[tokio::test]
    async fn unknown_alias_is_rejected_before_certification() {
        let (manager, _) = manager(&InMemoryStorage::new(), "manager");
        let document = manager
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(2, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap();
        let mut data = mdoc_data(&document).await;
        data[1].public_key_alias = "unknown".to_owned();

        let err = manager
            .store_issued_document(&document, data)
            .await
            .unwrap_err();

        assert_matches!(err.error, DocumentError::InvalidArgument(msg) if msg.contains("unknown"));
        assert!(document
            .credentials()
            .await
            .unwrap()
            .iter()
            .all(|c| !c.is_certified()));
    }

    #[tokio::test]
    async fn issued_document_records_the_issuer_data() {
        let (manager, _) = manager(&InMemoryStorage::new(), "manager");
        let document = manager
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(2, CredentialPolicy::RotateUse),
                Some(json!({ "display": [{ "name": "Driving Licence" }] })),
            )
            .await
            .unwrap();
        let data = mdoc_data(&document).await;
        let first = data[0].data.clone();

        let issued = manager
            .store_issued_document(&document, data)
            .await
            .unwrap();

        assert_eq!(issued.state(), DocumentState::Issued);
        assert_eq!(issued.name(), "Driving Licence");
        assert_eq!(issued.issuer_provided_data(), Some(first.as_slice()));
        assert!(issued.issued_at().is_some());
        assert!(issued
            .credentials()
            .await
            .unwrap()
            .iter()
            .all(Credential::is_certified));

        let err = manager
            .store_issued_document(&document, vec![])
            .await
            .unwrap_err();
        assert_matches!(err.error, DocumentError::IllegalState(_));
    }

    #[tokio::test]
    async fn partial_certification_can_be_retried_with_the_rest() {
        let (manager, _) = manager(&InMemoryStorage::new(), "manager");
        let document = manager
            .create_document(
                DocumentFormat::sd_jwt_vc(PID),
                settings(2, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap();
        let signers = document.proof_of_possession_signers().await.unwrap();
        let good = |index: usize| {
            IssuerProvidedCredential::new(
                signers[index].alias(),
                SdJwtVcFixture::new(PID, signers[index].public_key()).build(),
            )
        };
        // bound to the key of the first credential
        let bad = IssuerProvidedCredential::new(
            signers[1].alias(),
            SdJwtVcFixture::new(PID, signers[0].public_key()).build(),
        );

        let err = manager
            .store_issued_document(&document, vec![good(0), bad])
            .await
            .unwrap_err();
        assert_matches!(err.error, DocumentError::InvalidArgument(_));

        let stored = manager.get_document_by_id(document.id()).await.unwrap();
        assert_eq!(stored.state(), DocumentState::Unsigned);
        let pending = document.pending_credentials().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].alias(), signers[1].alias());

        let retried = good(1);
        let retried_data = retried.data.clone();
        let issued = manager
            .store_issued_document(&document, vec![retried])
            .await
            .unwrap();
        assert_eq!(issued.state(), DocumentState::Issued);

        let credentials = issued.credentials().await.unwrap();
        assert_eq!(credentials[0].alias(), signers[0].alias());
        assert!(credentials[0].issuer_provided_data().is_some());
        assert_eq!(
            issued.issuer_provided_data(),
            credentials[0].issuer_provided_data()
        );
        assert_ne!(issued.issuer_provided_data(), Some(retried_data.as_slice()));
    }

    #[tokio::test]
    async fn fully_certified_document_can_be_completed() {
        let (manager, _) = manager(&InMemoryStorage::new(), "manager");
        let document = manager
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(2, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap();
        let signers = document.proof_of_possession_signers().await.unwrap();

        // certified credentials left behind by a call which failed to save the metadata
        let credentials = manager.context.credentials(document.id());
        let now = Utc::now();
        for (signer, provided) in signers.iter().zip(mdoc_data(&document).await) {
            let mut credential = credentials.get(signer.alias()).await.unwrap().unwrap();
            certification::certify(
                &mut credential,
                signer.public_key(),
                provided.data,
                &CertificationOptions::default(),
                now,
            )
            .await
            .unwrap();
            credentials.put(&credential).await.unwrap();
        }
        let stored = manager.get_document_by_id(document.id()).await.unwrap();
        assert_eq!(stored.state(), DocumentState::Unsigned);

        let issued = manager
            .store_issued_document(&document, vec![])
            .await
            .unwrap();

        assert_eq!(issued.state(), DocumentState::Issued);
        let first = credentials.get(signers[0].alias()).await.unwrap().unwrap();
        assert_eq!(issued.issuer_provided_data(), first.issuer_provided_data());
    }

    #[tokio::test]
    async fn deferred_document_can_be_issued_later() {
        let (manager, _) = manager(&InMemoryStorage::new(), "manager");
        let document = manager
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(1, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap();

        manager
            .store_deferred_document(&document, b"transaction-1".to_vec())
            .await
            .unwrap();
        let deferred = manager
            .store_deferred_document(&document, b"transaction-2".to_vec())
            .await
            .unwrap();
        assert_eq!(deferred.state(), DocumentState::Deferred);
        assert_eq!(deferred.related_data(), b"transaction-2");
        assert_eq!(deferred.name(), MDL);

        let data = mdoc_data(&deferred).await;
        let issued = manager
            .store_issued_document(&deferred, data)
            .await
            .unwrap();
        assert_eq!(issued.state(), DocumentState::Issued);
        assert_eq!(issued.metadata().deferred_related_data(), None);

        let err = manager
            .store_deferred_document(&document, b"transaction-3".to_vec())
            .await
            .unwrap_err();
        assert_matches!(err.error, DocumentError::IllegalState(_));
    }

    #[tokio::test]
    async fn deferring_a_deleted_document_is_not_found() {
        let (manager, _) = manager(&InMemoryStorage::new(), "manager");
        let document = manager
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(1, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap();
        manager.delete_document_by_id(document.id()).await.unwrap();

        let err = manager
            .store_deferred_document(&document, vec![1])
            .await
            .unwrap_err();

        assert_matches!(err.error, DocumentError::NotFound(_));
    }

    #[tokio::test]
    async fn deletion_removes_the_keys_and_returns_proofs() {
        let (manager, secure_area) = manager(&InMemoryStorage::new(), "manager");
        let document = manager
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(2, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap();

        let proof = manager
            .delete_document_by_id(document.id())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(proof.document_id, document.id());
        assert_eq!(proof.proofs.len(), 2);
        assert_eq!(secure_area.key_count(), 0);
        assert!(manager.get_documents(None).await.unwrap().is_empty());
        assert_matches!(
            manager
                .get_document_by_id(document.id())
                .await
                .unwrap_err()
                .error,
            DocumentError::NotFound(_)
        );
        assert_matches!(
            manager
                .delete_document_by_id(document.id())
                .await
                .unwrap_err()
                .error,
            DocumentError::NotFound(_)
        );
    }

    #[tokio::test]
    async fn documents_can_be_filtered() {
        let (manager, _) = manager(&InMemoryStorage::new(), "manager");
        let unsigned = manager
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(1, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap();
        let to_issue = manager
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(1, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap();
        let data = mdoc_data(&to_issue).await;
        manager
            .store_issued_document(&to_issue, data)
            .await
            .unwrap();

        let issued_only = |document: &Document| matches!(document, Document::Issued(_));
        let issued = manager.get_documents(Some(&issued_only)).await.unwrap();

        assert_eq!(manager.get_documents(None).await.unwrap().len(), 2);
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].id(), to_issue.id());
        assert_ne!(issued[0].id(), unsigned.id());
    }

    #[tokio::test]
    async fn documents_of_other_managers_are_invisible() {
        let storage = InMemoryStorage::new();
        let (first, _) = manager(&storage, "first");
        let (second, _) = manager(&storage, "second");

        let document = first
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(1, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap();

        assert_eq!(first.get_documents(None).await.unwrap().len(), 1);
        assert!(second.get_documents(None).await.unwrap().is_empty());
        assert_matches!(
            second
                .get_document_by_id(document.id())
                .await
                .unwrap_err()
                .error,
            DocumentError::NotFound(_)
        );
        assert_matches!(
            second
                .store_deferred_document(&document, vec![1])
                .await
                .unwrap_err()
                .error,
            DocumentError::InvalidArgument(_)
        );
    }

    #[tokio::test]
    async fn metadata_of_another_manager_is_ignored_at_read_time() {
        let storage = InMemoryStorage::new();
        let (first, _) = manager(&storage, "first");
        let document = first
            .create_document(
                DocumentFormat::mso_mdoc(MDL),
                settings(1, CredentialPolicy::RotateUse),
                None,
            )
            .await
            .unwrap();

        // a foreign metadata blob copied into the namespace of the first manager
        let store = storage.scoped("first");
        let foreign = DocumentMetadata::new(
            "second".to_owned(),
            DocumentFormat::mso_mdoc(MDL),
            1,
            CredentialPolicy::RotateUse,
            Utc::now(),
            None,
        );
        store
            .put(document.id(), crate::metadata::METADATA_KEY, foreign.to_bytes().unwrap())
            .await
            .unwrap();

        assert!(first.get_documents(None).await.unwrap().is_empty());
        assert_matches!(
            first
                .get_document_by_id(document.id())
                .await
                .unwrap_err()
                .error,
            DocumentError::NotFound(_)
        );
    }
}
