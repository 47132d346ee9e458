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

//! Certification of credentials with the data provided by the issuer.
//!
//! The issuer data is validated against the credential before it is attached: the key asserted
//! by the issuer must be the credential key, and the document type must match the document
//! format.  The validity window of the credential is taken from the issuer data.

pub(crate) mod mdoc;
pub mod sd_jwt;

use bh_jws_utils::JwkPublic;
use bherror::traits::ErrorContext as _;
use chrono::{DateTime, Utc};

use crate::{
    credential::Credential, format::DocumentFormat, settings::CertificationOptions, Result,
};

/// The validity window asserted by the issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ValidityWindow {
    pub(crate) valid_from: DateTime<Utc>,
    pub(crate) valid_until: DateTime<Utc>,
}

/// Validate `issuer_provided_data` for the credential with the key `public_key`, and certify
/// the credential with it.
///
/// The credential is left unchanged on failure.
pub(crate) async fn certify(
    credential: &mut Credential,
    public_key: &JwkPublic,
    issuer_provided_data: Vec<u8>,
    options: &CertificationOptions,
    now: DateTime<Utc>,
) -> Result<()> {
    let validity = match credential.format() {
        DocumentFormat::MsoMdoc { doc_type } => mdoc::validate(
            &issuer_provided_data,
            doc_type,
            public_key,
            options.force_key_check(),
        )?,
        DocumentFormat::SdJwtVc { vct } => {
            sd_jwt::validate(&issuer_provided_data, vct, public_key, options, now).await?
        }
    };

    credential
        .certify(
            issuer_provided_data,
            validity.valid_from,
            validity.valid_until,
        )
        .ctx(|| format!("certifying credential `{}`", credential.alias()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration;

    use super::*;
    use crate::{
        test_utils::{mdoc_issuer_signed, random_public_key, SdJwtVcFixture},
        DocumentError,
    };

    fn credential(format: DocumentFormat) -> Credential {
        Credential::new(
            "key-0".to_owned(),
            "software".to_owned(),
            "manager".to_owned(),
            format,
            0,
        )
    }

    #[tokio::test]
    async fn mdoc_credential_takes_the_mso_validity() {
        let key = random_public_key();
        let from: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let until = from + Duration::days(365);
        let data = mdoc_issuer_signed("org.iso.18013.5.1.mDL", &key, from, until);
        let mut credential = credential(DocumentFormat::mso_mdoc("org.iso.18013.5.1.mDL"));

        certify(
            &mut credential,
            &key,
            data.clone(),
            &CertificationOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(credential.valid_from(), Some(from));
        assert_eq!(credential.valid_until(), Some(until));
        assert_eq!(credential.issuer_provided_data(), Some(data.as_slice()));
    }

    #[tokio::test]
    async fn sd_jwt_credential_is_certified() {
        let key = random_public_key();
        let data = SdJwtVcFixture::new("urn:eudi:pid:1", &key).build();
        let mut credential = credential(DocumentFormat::sd_jwt_vc("urn:eudi:pid:1"));

        certify(
            &mut credential,
            &key,
            data.into_bytes(),
            &CertificationOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(credential.is_certified());
    }

    #[tokio::test]
    async fn certified_credential_cannot_be_certified_again() {
        let key = random_public_key();
        let now = Utc::now();
        let data = mdoc_issuer_signed(
            "org.iso.18013.5.1.mDL",
            &key,
            now,
            now + Duration::days(1),
        );
        let mut credential = credential(DocumentFormat::mso_mdoc("org.iso.18013.5.1.mDL"));
        let options = CertificationOptions::default();

        certify(&mut credential, &key, data.clone(), &options, now)
            .await
            .unwrap();
        let err = certify(&mut credential, &key, data, &options, now)
            .await
            .unwrap_err();

        assert_matches!(err.error, DocumentError::IllegalState(_));
    }

    #[tokio::test]
    async fn failed_validation_leaves_the_credential_uncertified() {
        let key = random_public_key();
        let data = SdJwtVcFixture::new("urn:eudi:pid:1", &random_public_key()).build();
        let mut credential = credential(DocumentFormat::sd_jwt_vc("urn:eudi:pid:1"));

        let err = certify(
            &mut credential,
            &key,
            data.into_bytes(),
            &CertificationOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();

        assert_matches!(err.error, DocumentError::InvalidArgument(_));
        assert!(!credential.is_certified());
    }
}
