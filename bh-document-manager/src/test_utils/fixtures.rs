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

//! Issuer side fixtures: the data an issuer would return for a credential key.

use bh_jws_utils::{base64_url_encode, JwkPublic};
use chrono::{DateTime, SecondsFormat, Utc};
use ciborium::Value;
use coset::{iana, AsCborValue as _, CoseSign1Builder, HeaderBuilder};
use serde_json::json;

use super::symbolic_crypto::{random_public_key, SymbolicSignature};
use crate::key::jwk_to_cose_key;

fn text(value: &str) -> Value {
    Value::Text(value.to_owned())
}

fn tdate(date_time: DateTime<Utc>) -> Value {
    Value::Tag(
        0,
        Box::new(Value::Text(
            date_time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )),
    )
}

fn to_cbor(value: &Value) -> Vec<u8> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).unwrap();
    bytes
}

/// Encoded `IssuerSigned` of an `mso_mdoc` credential with no data elements.
///
/// The MSO binds the `device_key` and is symbolically signed by a random issuer key.
pub fn mdoc_issuer_signed(
    doc_type: &str,
    device_key: &JwkPublic,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
) -> Vec<u8> {
    let device_key = jwk_to_cose_key(device_key)
        .unwrap()
        .to_cbor_value()
        .unwrap();

    let mso = Value::Map(vec![
        (text("version"), text("1.0")),
        (text("digestAlgorithm"), text("SHA-256")),
        (
            text("valueDigests"),
            Value::Map(vec![(text(doc_type), Value::Map(vec![]))]),
        ),
        (
            text("deviceKeyInfo"),
            Value::Map(vec![(text("deviceKey"), device_key)]),
        ),
        (text("docType"), text(doc_type)),
        (
            text("validityInfo"),
            Value::Map(vec![
                (text("signed"), tdate(valid_from)),
                (text("validFrom"), tdate(valid_from)),
                (text("validUntil"), tdate(valid_until)),
            ]),
        ),
    ]);
    let payload = to_cbor(&Value::Tag(24, Box::new(Value::Bytes(to_cbor(&mso)))));

    let protected = HeaderBuilder::new()
        .algorithm(iana::Algorithm::ES256)
        .build();
    let issuer_key = random_public_key();
    let issuer_auth = CoseSign1Builder::new()
        .protected(protected)
        .signature(SymbolicSignature::new(&payload, &issuer_key).to_bytes())
        .payload(payload)
        .build()
        .to_cbor_value()
        .unwrap();

    to_cbor(&Value::Map(vec![
        (
            text("nameSpaces"),
            Value::Map(vec![(text(doc_type), Value::Array(vec![]))]),
        ),
        (text("issuerAuth"), issuer_auth),
    ]))
}

/// Builder of a Compact SD-JWT VC without disclosures.
///
/// By default the issuer-signed JWT contains the `iss`, `iat`, `vct` and `cnf` claims.
#[derive(Debug, Clone)]
pub struct SdJwtVcFixture {
    claims: serde_json::Map<String, serde_json::Value>,
}

impl SdJwtVcFixture {
    /// SD-JWT VC of the type `vct` bound to the `holder_key`.
    pub fn new(vct: &str, holder_key: &JwkPublic) -> Self {
        let mut claims = serde_json::Map::new();
        claims.insert("iss".to_owned(), json!("https://issuer.example.com"));
        claims.insert("iat".to_owned(), json!(Utc::now().timestamp()));
        claims.insert("vct".to_owned(), json!(vct));
        claims.insert("cnf".to_owned(), json!({ "jwk": holder_key }));

        Self { claims }
    }

    /// Add or replace a claim.
    pub fn with_claim(mut self, name: &str, value: serde_json::Value) -> Self {
        self.claims.insert(name.to_owned(), value);
        self
    }

    /// Remove a claim.
    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// The Compact SD-JWT serialization.
    pub fn build(&self) -> String {
        let header = json!({ "alg": "ES256", "typ": "dc+sd-jwt" });
        let header = base64_url_encode(serde_json::to_vec(&header).unwrap());
        let payload = base64_url_encode(serde_json::to_vec(&self.claims).unwrap());

        let issuer_key = random_public_key();
        let message = format!("{header}.{payload}");
        let signature =
            base64_url_encode(SymbolicSignature::new(message.as_bytes(), &issuer_key).to_bytes());

        format!("{message}.{signature}~")
    }
}
