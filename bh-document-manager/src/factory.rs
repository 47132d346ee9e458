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

//! Creation of the credentials of a new document.

use bherror::traits::{ErrorContext as _, PropagateError as _};

use crate::{
    credential::Credential,
    format::{DocumentFormat, MSO_MDOC_FORMAT, SD_JWT_VC_FORMAT},
    secure_area::SecureArea,
    settings::CreateDocumentSettings,
    DocumentError, Result,
};

/// The credentials created for a document, with the attestation of their keys.
#[derive(Debug)]
pub(crate) struct CredentialBatch {
    pub(crate) credentials: Vec<Credential>,
    pub(crate) attestation: Option<Vec<u8>>,
}

/// Creates the credentials for a document of a specific format.
pub(crate) enum CredentialFactory {
    Mdoc(MdocCredentialFactory),
    SdJwt(SdJwtCredentialFactory),
}

impl CredentialFactory {
    pub(crate) fn for_format(format: &DocumentFormat) -> Self {
        match format {
            DocumentFormat::MsoMdoc { .. } => Self::Mdoc(MdocCredentialFactory),
            DocumentFormat::SdJwtVc { .. } => Self::SdJwt(SdJwtCredentialFactory),
        }
    }

    pub(crate) async fn create_credentials(
        &self,
        format: &DocumentFormat,
        domain: &str,
        secure_area: &dyn SecureArea,
        settings: &CreateDocumentSettings,
    ) -> Result<CredentialBatch> {
        match self {
            Self::Mdoc(factory) => {
                factory
                    .create_credentials(format, domain, secure_area, settings)
                    .await
            }
            Self::SdJwt(factory) => {
                factory
                    .create_credentials(format, domain, secure_area, settings)
                    .await
            }
        }
    }
}

/// Factory of `mso_mdoc` credentials.
pub(crate) struct MdocCredentialFactory;

impl MdocCredentialFactory {
    async fn create_credentials(
        &self,
        format: &DocumentFormat,
        domain: &str,
        secure_area: &dyn SecureArea,
        settings: &CreateDocumentSettings,
    ) -> Result<CredentialBatch> {
        if !matches!(format, DocumentFormat::MsoMdoc { .. }) {
            return Err(unexpected_format(MSO_MDOC_FORMAT, format));
        }

        create_batch(format, domain, secure_area, settings).await
    }
}

/// Factory of SD-JWT VC credentials.
pub(crate) struct SdJwtCredentialFactory;

impl SdJwtCredentialFactory {
    async fn create_credentials(
        &self,
        format: &DocumentFormat,
        domain: &str,
        secure_area: &dyn SecureArea,
        settings: &CreateDocumentSettings,
    ) -> Result<CredentialBatch> {
        if !matches!(format, DocumentFormat::SdJwtVc { .. }) {
            return Err(unexpected_format(SD_JWT_VC_FORMAT, format));
        }

        create_batch(format, domain, secure_area, settings).await
    }
}

fn unexpected_format(expected: &str, actual: &DocumentFormat) -> bherror::Error<DocumentError> {
    bherror::Error::root(DocumentError::InvalidArgument(format!(
        "Expected format {expected}"
    )))
    .ctx(format!("got {actual}"))
}

async fn create_batch(
    format: &DocumentFormat,
    domain: &str,
    secure_area: &dyn SecureArea,
    settings: &CreateDocumentSettings,
) -> Result<CredentialBatch> {
    let count = settings.number_of_credentials() as usize;

    let batch = secure_area
        .batch_create_key(count, settings.create_key_settings())
        .await
        .match_err(DocumentError::from_secure_area)
        .ctx(|| format!("creating {count} keys"))?;

    if batch.keys.len() != count {
        delete_keys(secure_area, batch.keys.iter().map(|key| key.alias.as_str())).await;
        return Err(bherror::Error::root(DocumentError::SecureArea).ctx(format!(
            "secure area created {} keys instead of {count}",
            batch.keys.len()
        )));
    }

    let credentials = batch
        .keys
        .into_iter()
        .zip(0..)
        .map(|(key, sequence)| {
            Credential::new(
                key.alias,
                secure_area.identifier().to_owned(),
                domain.to_owned(),
                format.clone(),
                sequence,
            )
        })
        .collect();

    Ok(CredentialBatch {
        credentials,
        attestation: batch.attestation,
    })
}

/// Best effort deletion of keys which won't be bound to a credential.
pub(crate) async fn delete_keys<'a>(
    secure_area: &dyn SecureArea,
    aliases: impl IntoIterator<Item = &'a str>,
) {
    for alias in aliases {
        if let Err(error) = secure_area.delete_key(alias).await {
            tracing::warn!(alias, %error, "Failed to delete an unused key");
        }
    }
}
