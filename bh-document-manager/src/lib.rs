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

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! This crate manages the lifecycle of wallet documents and their credentials.
//!
//! A document is a digital identity document, e.g. a mobile driving licence or a PID, held in
//! one of the two supported formats: [ISO/IEC 18013-5][1] `mso_mdoc` and [SD-JWT VC][2].  Every
//! document owns a batch of credentials, each one bound to a private key held by a
//! [`SecureArea`] and individually certified by the issuer.  Presentations use the credentials
//! one at a time, according to the [`CredentialPolicy`] of the document.
//!
//! [1]: <https://www.iso.org/standard/69084.html>
//! [2]: <https://datatracker.ietf.org/doc/html/draft-ietf-oauth-sd-jwt-vc>
//!
//! # Details
//!
//! The document goes through the following states.
//!
//! * [`UnsignedDocument`] -- Created by [`DocumentManager::create_document`] together with the
//!   credential keys, waiting for the issuer.
//! * [`DeferredDocument`] -- The issuer deferred the issuance; see
//!   [`DocumentManager::store_deferred_document`].
//! * [`IssuedDocument`] -- All the credentials were certified by
//!   [`DocumentManager::store_issued_document`], and can be used for signing and key agreement.
//!
//! The [`DocumentManager`] is the entry point of the crate.  It persists documents through a
//! [`DocumentStore`] bound to its identifier, so that multiple managers can share the same
//! storage backend without seeing each other's documents.
//!
//! # Examples
//!
//! The `tests` directory of the crate walks through the whole lifecycle with the in-memory
//! collaborators from the `test-utils` feature.

pub use bh_jws_utils::{JwkPublic, SigningAlgorithm};
pub use credential::Credential;
pub use document::{
    Consumed, DeferredDocument, Document, DocumentCore, IssuedDocument, ProofOfPossessionSigner,
    UnsignedDocument,
};
pub use error::{DocumentError, Result};
pub use format::{DocumentFormat, LEGACY_SD_JWT_VC_FORMAT, MSO_MDOC_FORMAT, SD_JWT_VC_FORMAT};
pub use manager::{DeletionProof, DocumentManager, DocumentPredicate, IssuerProvidedCredential};
pub use metadata::{DocumentMetadata, DocumentState, METADATA_KEY};
pub use policy::CredentialPolicy;
pub use secure_area::{
    CreateKeySettings, KeyBatch, KeyInfo, SecureArea, SecureAreaError, SecureAreaRepository,
    SecureAreaResult, UnlockData,
};
pub use settings::{CertificationOptions, CreateDocumentSettings, DEFAULT_SD_JWT_VALIDITY_DAYS};
pub use storage::{
    DocumentStore, InMemoryStorage, ScopedInMemoryStore, StorageError, StorageResult,
};

pub mod certification;
mod credential;
mod document;
mod error;
mod factory;
mod format;
pub mod key;
mod lock;
mod manager;
mod metadata;
mod policy;
mod secure_area;
mod settings;
mod storage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
mod utils;
