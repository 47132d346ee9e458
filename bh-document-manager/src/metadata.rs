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

//! This module defines the document metadata blob.
//!
//! The metadata is stored as a _CBOR_ map with `camelCase` keys under the [`METADATA_KEY`] of the
//! document record.  Decoding is lenient: optional fields which are missing decode as absent,
//! unknown fields are ignored and a missing credential policy decodes as
//! [`CredentialPolicy::RotateUse`].

use bherror::traits::ErrorContext as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    format::DocumentFormat,
    policy::CredentialPolicy,
    utils::{from_cbor, to_cbor, Bytes},
    DocumentError, Result,
};

/// The document store key under which the metadata blob is stored.
pub const METADATA_KEY: &str = "metadata";

/// The lifecycle state of a document, derived from its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum DocumentState {
    /// Credentials were created, but the issuer hasn't provided any data yet.
    Unsigned,
    /// The issuer deferred the issuance.
    Deferred,
    /// The credentials were certified by the issuer.
    Issued,
}

/// Metadata of a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    document_manager_id: String,
    format: DocumentFormat,
    initial_credentials_count: u32,
    #[serde(default)]
    credential_policy: CredentialPolicy,
    created_at: DateTime<Utc>,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    issuer_metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    issued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    issuer_provided_data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_attestation: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deferred_related_data: Option<Bytes>,
}

impl DocumentMetadata {
    pub(crate) fn new(
        document_manager_id: String,
        format: DocumentFormat,
        initial_credentials_count: u32,
        credential_policy: CredentialPolicy,
        created_at: DateTime<Utc>,
        issuer_metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            document_manager_id,
            format,
            initial_credentials_count,
            credential_policy,
            created_at,
            name: String::new(),
            issuer_metadata,
            issued_at: None,
            issuer_provided_data: None,
            key_attestation: None,
            deferred_related_data: None,
        }
    }

    /// Encode the metadata into its _CBOR_ blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_cbor(self).ctx(|| "encoding document metadata")
    }

    /// Decode the metadata from its _CBOR_ blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        from_cbor(bytes).ctx(|| "decoding document metadata")
    }

    /// The lifecycle state of the document.
    pub fn state(&self) -> DocumentState {
        if self.issued_at.is_some() {
            DocumentState::Issued
        } else if self.deferred_related_data.is_some() {
            DocumentState::Deferred
        } else {
            DocumentState::Unsigned
        }
    }

    /// The identifier of the document manager owning the document.
    pub fn document_manager_id(&self) -> &str {
        &self.document_manager_id
    }

    /// The format of the document.
    pub fn format(&self) -> &DocumentFormat {
        &self.format
    }

    /// How many credentials were created together with the document.
    pub fn initial_credentials_count(&self) -> u32 {
        self.initial_credentials_count
    }

    /// The policy applied to the credentials after each use.
    pub fn credential_policy(&self) -> CredentialPolicy {
        self.credential_policy
    }

    /// When the document was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The display name of the document; empty until it's issued or deferred.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opaque issuer metadata provided when the document was created.
    pub fn issuer_metadata(&self) -> Option<&serde_json::Value> {
        self.issuer_metadata.as_ref()
    }

    /// When the document was issued.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// The raw issuer data of the first certified credential.
    pub fn issuer_provided_data(&self) -> Option<&[u8]> {
        self.issuer_provided_data.as_ref().map(|b| b.0.as_slice())
    }

    /// The attestation of the credential keys, if the secure area provided one.
    pub fn key_attestation(&self) -> Option<&[u8]> {
        self.key_attestation.as_ref().map(|b| b.0.as_slice())
    }

    /// The data related to a deferred issuance.
    pub fn deferred_related_data(&self) -> Option<&[u8]> {
        self.deferred_related_data.as_ref().map(|b| b.0.as_slice())
    }

    pub(crate) fn set_key_attestation(&mut self, key_attestation: Option<Vec<u8>>) {
        self.key_attestation = key_attestation.map(Bytes::from);
    }

    /// Record the issuance; any deferred data is cleared.
    pub(crate) fn mark_issued(
        &mut self,
        name: String,
        issuer_provided_data: Vec<u8>,
        issued_at: DateTime<Utc>,
    ) {
        self.name = name;
        self.issuer_provided_data = Some(issuer_provided_data.into());
        self.issued_at = Some(issued_at);
        self.deferred_related_data = None;
    }

    /// Record the deferred issuance, overwriting previously deferred data.
    pub(crate) fn mark_deferred(&mut self, name: String, related_data: Vec<u8>) -> Result<()> {
        if self.state() == DocumentState::Issued {
            return Err(bherror::Error::root(DocumentError::IllegalState(
                "document is already issued".to_owned(),
            )));
        }

        self.name = name;
        self.deferred_related_data = Some(related_data.into());

        Ok(())
    }
}
