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

//! Validation of the `IssuerSigned` structure of an `mso_mdoc` credential, as defined in the
//! section `8.3.2.1.2.2` of the [ISO/IEC 18013-5:2021][1].
//!
//! Only the parts of the Mobile Security Object needed to certify a credential are read.  The
//! issuer signature itself is verified by the holder library on presentation.
//!
//! [1]: <https://www.iso.org/standard/69084.html>

use bh_jws_utils::JwkPublic;
use bherror::traits::{ErrorContext as _, ForeignError as _};
use chrono::{DateTime, Utc};
use ciborium::Value;
use coset::{AsCborValue as _, CoseSign1};

use super::ValidityWindow;
use crate::{
    key::{cose_key_to_jwk, public_keys_match},
    DocumentError, Result,
};

/// A _CBOR_ tag value for date-time as specified in [RFC 8949][1].
///
/// [1]: <https://datatracker.ietf.org/doc/html/rfc8949#name-standard-date-time-string>
const TDATE_CBOR_TAG: u64 = 0;

/// A _CBOR_ tag value for epoch-based date-time as specified in [RFC 8949][1].
///
/// [1]: <https://datatracker.ietf.org/doc/html/rfc8949#name-epoch-based-date-time>
const EPOCH_DATE_TIME_CBOR_TAG: u64 = 1;

/// A _CBOR_ tag value for the _CBOR_ byte-string holding encoded _CBOR_.
const BYTES_CBOR_TAG: u64 = 24;

/// A _CBOR_ tag value of the `COSE_Sign1` structure as specified in [RFC 9052][1].
///
/// [1]: <https://www.rfc-editor.org/rfc/rfc9052#name-signing-with-one-signer>
const COSE_SIGN1_CBOR_TAG: u64 = 18;

/// The parts of the Mobile Security Object needed to certify a credential.
#[derive(Debug, Clone, PartialEq)]
struct MobileSecurityObject {
    doc_type: String,
    device_key: JwkPublic,
    validity: ValidityWindow,
}

/// Validate the `IssuerSigned` bytes for the credential and return the validity window.
pub(crate) fn validate(
    issuer_signed: &[u8],
    doc_type: &str,
    public_key: &JwkPublic,
    force_key_check: bool,
) -> Result<ValidityWindow> {
    let mso = decode_mso(issuer_signed).ctx(|| "invalid `IssuerSigned`")?;

    if mso.doc_type != doc_type {
        return Err(bherror::Error::root(DocumentError::InvalidArgument(
            "document type mismatch".to_owned(),
        ))
        .ctx(format!("expected `{doc_type}`, MSO has `{}`", mso.doc_type)));
    }

    if force_key_check && !public_keys_match(&mso.device_key, public_key) {
        return Err(bherror::Error::root(DocumentError::InvalidArgument(
            "device key doesn't match the credential key".to_owned(),
        )));
    }

    Ok(mso.validity)
}

fn invalid(message: &str) -> bherror::Error<DocumentError> {
    bherror::Error::root(DocumentError::InvalidArgument(message.to_owned()))
}

fn decode_mso(issuer_signed: &[u8]) -> Result<MobileSecurityObject> {
    let issuer_signed: Value = ciborium::from_reader(issuer_signed)
        .foreign_err(|| DocumentError::InvalidArgument("malformed CBOR".to_owned()))?;

    let issuer_auth = match map_get(&issuer_signed, "issuerAuth") {
        Some(Value::Tag(COSE_SIGN1_CBOR_TAG, value)) => (**value).clone(),
        Some(value) => value.clone(),
        None => return Err(invalid("`issuerAuth` is missing")),
    };

    let issuer_auth = CoseSign1::from_cbor_value(issuer_auth)
        .map_err(|err| invalid("`issuerAuth` is not a `COSE_Sign1`").ctx(err.to_string()))?;

    let Some(payload) = issuer_auth.payload else {
        return Err(invalid("MSO is missing"));
    };

    let mso_bytes: Value = ciborium::from_reader(payload.as_slice())
        .foreign_err(|| DocumentError::InvalidArgument("malformed MSO".to_owned()))?;

    let Value::Tag(BYTES_CBOR_TAG, mso_bytes) = mso_bytes else {
        return Err(invalid("MSO MUST be tagged with `24`"));
    };
    let mso_bytes = mso_bytes
        .as_bytes()
        .ok_or_else(|| invalid("MSO MUST be `Bytes`"))?;

    let mso: Value = ciborium::from_reader(mso_bytes.as_slice())
        .foreign_err(|| DocumentError::InvalidArgument("malformed MSO".to_owned()))?;

    let doc_type = map_get(&mso, "docType")
        .and_then(Value::as_text)
        .ok_or_else(|| invalid("`docType` is missing"))?
        .to_owned();

    let device_key = map_get(&mso, "deviceKeyInfo")
        .and_then(|info| map_get(info, "deviceKey"))
        .ok_or_else(|| invalid("`deviceKey` is missing"))?;
    let device_key = coset::CoseKey::from_cbor_value(device_key.clone())
        .map_err(|err| invalid("`deviceKey` is not a `COSE_Key`").ctx(err.to_string()))?;
    let device_key = cose_key_to_jwk(&device_key)?;

    let validity_info =
        map_get(&mso, "validityInfo").ok_or_else(|| invalid("`validityInfo` is missing"))?;
    let validity = ValidityWindow {
        valid_from: tdate(validity_info, "validFrom")?,
        valid_until: tdate(validity_info, "validUntil")?,
    };

    Ok(MobileSecurityObject {
        doc_type,
        device_key,
        validity,
    })
}

/// Returns the value of the text `key` of the _CBOR_ map.
fn map_get<'a>(map: &'a Value, key: &str) -> Option<&'a Value> {
    map.as_map()?
        .iter()
        .find_map(|(k, v)| (k.as_text() == Some(key)).then_some(v))
}

/// Reads the date-time field of the `validityInfo`.
///
/// The `tdate` is the form mandated by the standard, but epoch-based values are accepted as well.
fn tdate(validity_info: &Value, field: &'static str) -> Result<DateTime<Utc>> {
    let value = map_get(validity_info, field)
        .ok_or_else(|| invalid("date-time is missing").ctx(field))?;

    match value {
        Value::Tag(TDATE_CBOR_TAG, value) => {
            let value = value
                .as_text()
                .ok_or_else(|| invalid("`tdate` MUST be `String`").ctx(field))?;

            DateTime::parse_from_rfc3339(value)
                .foreign_err(|| DocumentError::InvalidArgument("invalid `tdate`".to_owned()))
                .ctx(|| format!("{field}: {value}"))
                .map(|date_time| date_time.with_timezone(&Utc))
        }
        Value::Tag(EPOCH_DATE_TIME_CBOR_TAG, value) => value
            .as_integer()
            .and_then(|seconds| i64::try_from(seconds).ok())
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
            .ok_or_else(|| invalid("epoch date-time out of range").ctx(field)),
        _ => Err(invalid("date-time MUST be tagged with `0`").ctx(field)),
    }
}
