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

//! Settings controlling document creation and credential certification.

use std::{fmt, num::NonZeroU32, sync::Arc};

use chrono::Duration;

use crate::{
    certification::sd_jwt::{AcceptAllIssuers, SdJwtIssuerVerifier},
    policy::CredentialPolicy,
    secure_area::CreateKeySettings,
    DocumentError, Result,
};

/// Validity of an SD-JWT VC without the `exp` claim, counted from its start of validity.
pub const DEFAULT_SD_JWT_VALIDITY_DAYS: i64 = 30;

/// Settings of a new document.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateDocumentSettings {
    secure_area_identifier: String,
    create_key_settings: CreateKeySettings,
    number_of_credentials: NonZeroU32,
    credential_policy: CredentialPolicy,
}

impl CreateDocumentSettings {
    /// Create settings for a document with `number_of_credentials` credentials whose keys are
    /// created in the secure area registered under `secure_area_identifier`.
    ///
    /// Fails with [`DocumentError::InvalidArgument`] if `number_of_credentials` is zero.
    pub fn new(
        secure_area_identifier: impl Into<String>,
        create_key_settings: CreateKeySettings,
        number_of_credentials: u32,
    ) -> Result<Self> {
        let number_of_credentials = NonZeroU32::new(number_of_credentials).ok_or_else(|| {
            bherror::Error::root(DocumentError::InvalidArgument(
                "number of credentials must be greater than zero".to_owned(),
            ))
        })?;

        Ok(Self {
            secure_area_identifier: secure_area_identifier.into(),
            create_key_settings,
            number_of_credentials,
            credential_policy: CredentialPolicy::default(),
        })
    }

    /// Set the policy applied to the credentials after each use.
    pub fn with_credential_policy(mut self, credential_policy: CredentialPolicy) -> Self {
        self.credential_policy = credential_policy;
        self
    }

    /// The identifier of the secure area creating the credential keys.
    pub fn secure_area_identifier(&self) -> &str {
        &self.secure_area_identifier
    }

    /// Settings passed to the secure area when creating the credential keys.
    pub fn create_key_settings(&self) -> &CreateKeySettings {
        &self.create_key_settings
    }

    /// The number of credentials to create.
    pub fn number_of_credentials(&self) -> u32 {
        self.number_of_credentials.get()
    }

    /// The policy applied to the credentials after each use.
    pub fn credential_policy(&self) -> CredentialPolicy {
        self.credential_policy
    }
}

/// Options of the certification of issued credentials.
#[derive(Clone)]
pub struct CertificationOptions {
    force_key_check: bool,
    sd_jwt_default_validity: Duration,
    sd_jwt_issuer_verifier: Arc<dyn SdJwtIssuerVerifier>,
}

impl Default for CertificationOptions {
    fn default() -> Self {
        Self {
            force_key_check: true,
            sd_jwt_default_validity: Duration::days(DEFAULT_SD_JWT_VALIDITY_DAYS),
            sd_jwt_issuer_verifier: Arc::new(AcceptAllIssuers),
        }
    }
}

impl fmt::Debug for CertificationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificationOptions")
            .field("force_key_check", &self.force_key_check)
            .field("sd_jwt_default_validity", &self.sd_jwt_default_validity)
            .finish_non_exhaustive()
    }
}

impl CertificationOptions {
    /// Whether the issuer asserted device key must equal the credential key.
    ///
    /// Turning this off is only meant for testing against issuers which don't bind the key.
    pub fn with_force_key_check(mut self, force_key_check: bool) -> Self {
        self.force_key_check = force_key_check;
        self
    }

    /// Set the validity of SD-JWT VCs without the `exp` claim.
    pub fn with_sd_jwt_default_validity(mut self, validity: Duration) -> Self {
        self.sd_jwt_default_validity = validity;
        self
    }

    /// Set the verifier of the SD-JWT VC issuer signature.
    pub fn with_sd_jwt_issuer_verifier(mut self, verifier: Arc<dyn SdJwtIssuerVerifier>) -> Self {
        self.sd_jwt_issuer_verifier = verifier;
        self
    }

    /// Whether the issuer asserted device key must equal the credential key.
    pub fn force_key_check(&self) -> bool {
        self.force_key_check
    }

    /// The validity of SD-JWT VCs without the `exp` claim.
    pub fn sd_jwt_default_validity(&self) -> Duration {
        self.sd_jwt_default_validity
    }

    /// The verifier of the SD-JWT VC issuer signature.
    pub fn sd_jwt_issuer_verifier(&self) -> &dyn SdJwtIssuerVerifier {
        self.sd_jwt_issuer_verifier.as_ref()
    }
}
