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

//! Validation of issued [SD-JWT VC][1] credentials.
//!
//! The signature and trust chain of the issuer are verified by an [`SdJwtIssuerVerifier`]
//! supplied by the caller; this module only checks that the issuer-signed JWT binds the
//! credential key and reads its validity.
//!
//! [1]: <https://datatracker.ietf.org/doc/draft-ietf-oauth-sd-jwt-vc/>

use bh_jws_utils::{jwt, JwkPublic};
use bherror::traits::{ErrorContext as _, ForeignError as _, PropagateError as _};
use chrono::{DateTime, Utc};
use futures::{future::BoxFuture, FutureExt as _};
use serde_json::Value;

use super::ValidityWindow;
use crate::{key::public_keys_match, settings::CertificationOptions, DocumentError, Result};

/// The separator between the parts of the Compact SD-JWT serialization.
const SD_JWT_DELIMITER: char = '~';

type JsonObject = serde_json::Map<String, Value>;

/// Error type returned by [`SdJwtIssuerVerifier`] implementations.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum IssuerVerificationError {
    /// The issuer isn't trusted, e.g. its certificate doesn't chain to a trust anchor.
    #[strum(to_string = "Untrusted issuer")]
    UntrustedIssuer,

    /// The issuer signature is invalid.
    #[strum(to_string = "Invalid issuer signature")]
    InvalidSignature,

    /// The issuer keys could not be retrieved.
    #[strum(to_string = "Issuer key lookup failed")]
    KeyLookup,
}

impl bherror::BhError for IssuerVerificationError {}

/// Verifies the authenticity of the issuer of an SD-JWT VC.
pub trait SdJwtIssuerVerifier: Send + Sync {
    /// Verify the issuer signature of the Compact SD-JWT.
    fn verify<'a>(
        &'a self,
        sd_jwt: &'a str,
    ) -> BoxFuture<'a, bherror::Result<(), IssuerVerificationError>>;
}

/// An [`SdJwtIssuerVerifier`] which accepts every issuer.
///
/// It is the default verifier for wallets which verify the issuer elsewhere, e.g. during the
/// credential issuance protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllIssuers;

impl SdJwtIssuerVerifier for AcceptAllIssuers {
    fn verify<'a>(
        &'a self,
        _sd_jwt: &'a str,
    ) -> BoxFuture<'a, bherror::Result<(), IssuerVerificationError>> {
        tracing::warn!("Issuer's authenticity will not be verified");
        futures::future::ready(Ok(())).boxed()
    }
}

/// Validate the Compact SD-JWT bytes for the credential and return the validity window.
pub(crate) async fn validate(
    issuer_provided_data: &[u8],
    vct: &str,
    public_key: &JwkPublic,
    options: &CertificationOptions,
    now: DateTime<Utc>,
) -> Result<ValidityWindow> {
    let sd_jwt = std::str::from_utf8(issuer_provided_data)
        .foreign_err(|| DocumentError::InvalidArgument("SD-JWT is not UTF-8".to_owned()))?;

    options
        .sd_jwt_issuer_verifier()
        .verify(sd_jwt)
        .await
        .with_err(|| DocumentError::InvalidArgument("issuer verification failed".to_owned()))?;

    let claims = issuer_jwt_claims(sd_jwt)?;

    if let Some(claimed_vct) = claims.get("vct") {
        if claimed_vct.as_str() != Some(vct) {
            return Err(bherror::Error::root(DocumentError::InvalidArgument(
                "`vct` mismatch".to_owned(),
            ))
            .ctx(format!("expected `{vct}`, got {claimed_vct}")));
        }
    }

    if options.force_key_check() {
        if let Some(jwk) = claims.get("cnf").and_then(|cnf| cnf.get("jwk")) {
            let matches = jwk
                .as_object()
                .is_some_and(|jwk| public_keys_match(jwk, public_key));

            if !matches {
                return Err(bherror::Error::root(DocumentError::InvalidArgument(
                    "`cnf.jwk` doesn't match the credential key".to_owned(),
                )));
            }
        }
    }

    let valid_from = match numeric_date(&claims, "nbf")? {
        Some(nbf) => nbf,
        None => numeric_date(&claims, "iat")?.unwrap_or(now),
    };
    let valid_until = match numeric_date(&claims, "exp")? {
        Some(exp) => exp,
        None => valid_from + options.sd_jwt_default_validity(),
    };

    Ok(ValidityWindow {
        valid_from,
        valid_until,
    })
}

/// Decode the claims of the issuer-signed JWT without verifying its signature.
fn issuer_jwt_claims(sd_jwt: &str) -> Result<JsonObject> {
    let issuer_jwt = sd_jwt
        .split(SD_JWT_DELIMITER)
        .next()
        .unwrap_or_default();

    // the signature is left to the `SdJwtIssuerVerifier`
    let token: jwt::Token<JsonObject, JsonObject, _> = jwt::Token::parse_unverified(issuer_jwt)
        .foreign_err(|| {
            DocumentError::InvalidArgument("issuer-signed JWT is not parseable".to_owned())
        })
        .ctx(|| "decoding the issuer-signed JWT")?;

    Ok(token.claims().clone())
}

/// Read the `NumericDate` claim, as defined in the `Section 2` of [RFC 7519][1].
///
/// [1]: <https://www.rfc-editor.org/rfc/rfc7519#section-2>
fn numeric_date(
    claims: &JsonObject,
    name: &'static str,
) -> Result<Option<DateTime<Utc>>> {
    let Some(value) = claims.get(name) else {
        return Ok(None);
    };

    value
        .as_i64()
        .or_else(|| value.as_f64().map(|seconds| seconds.trunc() as i64))
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .map(Some)
        .ok_or_else(|| {
            bherror::Error::root(DocumentError::InvalidArgument(format!(
                "`{name}` is not a valid NumericDate"
            )))
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::test_utils::{random_public_key, SdJwtVcFixture};

    const VCT: &str = "urn:eudi:pid:1";

    struct RejectAllIssuers;

    impl SdJwtIssuerVerifier for RejectAllIssuers {
        fn verify<'a>(
            &'a self,
            _sd_jwt: &'a str,
        ) -> BoxFuture<'a, bherror::Result<(), IssuerVerificationError>> {
            futures::future::ready(Err(bherror::Error::root(
                IssuerVerificationError::UntrustedIssuer,
            )))
            .boxed()
        }
    }

    fn timestamp(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    async fn validity(
        fixture: SdJwtVcFixture,
        key: &JwkPublic,
        now: DateTime<Utc>,
    ) -> ValidityWindow {
        validate(
            fixture.build().as_bytes(),
            VCT,
            key,
            &CertificationOptions::default(),
            now,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn validity_is_taken_from_nbf_and_exp() {
        let key = random_public_key();
        let fixture = SdJwtVcFixture::new(VCT, &key)
            .with_claim("iat", json!(1_000))
            .with_claim("nbf", json!(2_000))
            .with_claim("exp", json!(3_000));

        let validity = validity(fixture, &key, Utc::now()).await;

        assert_eq!(validity.valid_from, timestamp(2_000));
        assert_eq!(validity.valid_until, timestamp(3_000));
    }

    #[tokio::test]
    async fn validity_falls_back_to_iat_and_default_validity() {
        let key = random_public_key();
        let fixture = SdJwtVcFixture::new(VCT, &key).with_claim("iat", json!(1_000));

        let validity = validity(fixture, &key, Utc::now()).await;

        assert_eq!(validity.valid_from, timestamp(1_000));
        assert_eq!(validity.valid_until, timestamp(1_000) + Duration::days(30));
    }

    #[tokio::test]
    async fn validity_falls_back_to_now() {
        let key = random_public_key();
        let now = timestamp(5_000);

        let fixture = SdJwtVcFixture::new(VCT, &key).without_claim("iat");

        let validity = validity(fixture, &key, now).await;

        assert_eq!(validity.valid_from, now);
        assert_eq!(validity.valid_until, now + Duration::days(30));
    }

    #[tokio::test]
    async fn default_validity_is_configurable() {
        let key = random_public_key();
        let now = timestamp(5_000);
        let options =
            CertificationOptions::default().with_sd_jwt_default_validity(Duration::days(1));

        let validity = validate(
            SdJwtVcFixture::new(VCT, &key)
                .without_claim("iat")
                .build()
                .as_bytes(),
            VCT,
            &key,
            &options,
            now,
        )
        .await
        .unwrap();

        assert_eq!(validity.valid_until, now + Duration::days(1));
    }

    #[tokio::test]
    async fn cnf_key_is_checked_only_when_forced() {
        let key = random_public_key();
        let data = SdJwtVcFixture::new(VCT, &random_public_key()).build();
        let now = Utc::now();

        let err = validate(data.as_bytes(), VCT, &key, &CertificationOptions::default(), now)
            .await
            .unwrap_err();
        assert_matches!(err.error, DocumentError::InvalidArgument(msg) if msg.contains("cnf.jwk"));

        let options = CertificationOptions::default().with_force_key_check(false);
        assert!(validate(data.as_bytes(), VCT, &key, &options, now)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn missing_cnf_is_accepted() {
        let key = random_public_key();
        let data = SdJwtVcFixture::new(VCT, &key).without_claim("cnf").build();

        assert!(validate(
            data.as_bytes(),
            VCT,
            &key,
            &CertificationOptions::default(),
            Utc::now()
        )
        .await
        .is_ok());
    }

    #[tokio::test]
    async fn vct_must_match() {
        let key = random_public_key();
        let data = SdJwtVcFixture::new("urn:other:1", &key).build();

        let err = validate(
            data.as_bytes(),
            VCT,
            &key,
            &CertificationOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();

        assert_matches!(err.error, DocumentError::InvalidArgument(msg) if msg == "`vct` mismatch");
    }

    #[tokio::test]
    async fn rejected_issuer_fails_certification() {
        let key = random_public_key();
        let options =
            CertificationOptions::default().with_sd_jwt_issuer_verifier(Arc::new(RejectAllIssuers));

        let err = validate(
            SdJwtVcFixture::new(VCT, &key).build().as_bytes(),
            VCT,
            &key,
            &options,
            Utc::now(),
        )
        .await
        .unwrap_err();

        assert_matches!(err.error, DocumentError::InvalidArgument(msg) if msg == "issuer verification failed");
    }

    #[tokio::test]
    async fn malformed_sd_jwt_is_rejected() {
        for data in ["", "only.two~", "a.!!!.c~"] {
            let err = validate(
                data.as_bytes(),
                VCT,
                &random_public_key(),
                &CertificationOptions::default(),
                Utc::now(),
            )
            .await
            .unwrap_err();

            assert_matches!(err.error, DocumentError::InvalidArgument(_));
        }
    }

    #[tokio::test]
    async fn invalid_numeric_date_is_rejected() {
        let key = random_public_key();
        let data = SdJwtVcFixture::new(VCT, &key)
            .with_claim("exp", json!("tomorrow"))
            .build();

        let err = validate(
            data.as_bytes(),
            VCT,
            &key,
            &CertificationOptions::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();

        assert_matches!(err.error, DocumentError::InvalidArgument(msg) if msg.contains("exp"));
    }
}
