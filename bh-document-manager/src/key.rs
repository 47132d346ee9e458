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

//! Utilities for comparing public keys and converting them between the JWK and `COSE_Key`
//! representations.

use bh_jws_utils::{base64_url_decode, base64_url_encode, JwkPublic};
use bherror::traits::ForeignError as _;
use coset::{
    iana::{Ec2KeyParameter, EllipticCurve},
    KeyType, Label,
};

use crate::{DocumentError, Result};

/// JWK members which identify the key material, as per `Section 3.2` of [RFC 7638][1].
///
/// [1]: <https://www.rfc-editor.org/rfc/rfc7638>
const KEY_MATERIAL_MEMBERS: [&str; 6] = ["kty", "crv", "x", "y", "n", "e"];

/// Whether the two JWKs describe the same public key.
///
/// Only the members carrying key material are compared, so metadata such as `kid`, `alg` or `use`
/// does not influence the result.
pub fn public_keys_match(first: &JwkPublic, second: &JwkPublic) -> bool {
    first.contains_key("kty")
        && KEY_MATERIAL_MEMBERS
            .iter()
            .all(|member| first.get(*member) == second.get(*member))
}

fn curve_name(curve: i64) -> Option<&'static str> {
    match curve {
        c if c == EllipticCurve::P_256 as i64 => Some("P-256"),
        c if c == EllipticCurve::P_384 as i64 => Some("P-384"),
        c if c == EllipticCurve::P_521 as i64 => Some("P-521"),
        _ => None,
    }
}

fn curve_from_name(name: &str) -> Option<EllipticCurve> {
    match name {
        "P-256" => Some(EllipticCurve::P_256),
        "P-384" => Some(EllipticCurve::P_384),
        "P-521" => Some(EllipticCurve::P_521),
        _ => None,
    }
}

/// Converts the `COSE_Key` to JWK.
///
/// Only `EC2` keys over the NIST curves are supported.
pub fn cose_key_to_jwk(cose_key: &coset::CoseKey) -> Result<JwkPublic> {
    if cose_key.kty != KeyType::Assigned(coset::iana::KeyType::EC2) {
        return Err(bherror::Error::root(DocumentError::InvalidArgument(
            "only EC2 device keys are supported".to_owned(),
        )));
    }

    let curve = get_cose_key_param(cose_key, Ec2KeyParameter::Crv)?
        .as_integer()
        .and_then(|curve| i64::try_from(curve).ok())
        .and_then(curve_name)
        .ok_or_else(|| {
            bherror::Error::root(DocumentError::InvalidArgument(
                "unsupported device key curve".to_owned(),
            ))
        })?;

    let coordinate = |param| -> Result<String> {
        let bytes = get_cose_key_param(cose_key, param)?
            .as_bytes()
            .ok_or_else(|| {
                bherror::Error::root(DocumentError::InvalidArgument(format!(
                    "device key parameter {param:?} MUST BE bytes"
                )))
            })?;
        Ok(base64_url_encode(bytes))
    };

    let mut jwk = JwkPublic::new();
    jwk.insert("kty".to_owned(), "EC".into());
    jwk.insert("crv".to_owned(), curve.into());
    jwk.insert("x".to_owned(), coordinate(Ec2KeyParameter::X)?.into());
    jwk.insert("y".to_owned(), coordinate(Ec2KeyParameter::Y)?.into());

    Ok(jwk)
}

/// Converts the EC JWK to `COSE_Key`.
pub fn jwk_to_cose_key(jwk: &JwkPublic) -> Result<coset::CoseKey> {
    let member = |name: &'static str| -> Result<&str> {
        jwk.get(name)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                bherror::Error::root(DocumentError::InvalidArgument(format!(
                    "JWK member `{name}` is missing"
                )))
            })
    };

    if member("kty")? != "EC" {
        return Err(bherror::Error::root(DocumentError::InvalidArgument(
            "only EC keys are supported".to_owned(),
        )));
    }

    let curve = curve_from_name(member("crv")?).ok_or_else(|| {
        bherror::Error::root(DocumentError::InvalidArgument(
            "unsupported JWK curve".to_owned(),
        ))
    })?;

    let coordinate = |name: &'static str| -> Result<Vec<u8>> {
        base64_url_decode(member(name)?).foreign_err(|| {
            DocumentError::InvalidArgument(format!("JWK coordinate `{name}` is not base64url"))
        })
    };

    Ok(coset::CoseKeyBuilder::new_ec2_pub_key(curve, coordinate("x")?, coordinate("y")?).build())
}

/// Returns the param of the provided `COSE_Key`.
///
/// If there are multiple entries with the same label, only the first one is returned.
fn get_cose_key_param(
    cose_key: &coset::CoseKey,
    param: Ec2KeyParameter,
) -> Result<&ciborium::Value> {
    let label = Label::Int(param as i64);

    cose_key
        .params
        .iter()
        .find_map(|(l, v)| (l == &label).then_some(v))
        .ok_or_else(|| {
            bherror::Error::root(DocumentError::InvalidArgument(format!(
                "device key parameter {param:?} not found"
            )))
        })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bh_jws_utils::json_object;

    use super::*;

    fn p256_jwk() -> JwkPublic {
        json_object!({
            "kty": "EC",
            "crv": "P-256",
            "x": "MKBCTNIcKUSDii11ySs3526iDZ8AiTo7Tu6KPAqv7D4",
            "y": "4Etl6SRW2YiLUrN5vfvVHuhp7x8PxltmWWlbbM4IFyM",
        })
    }

    #[test]
    fn keys_match_ignoring_metadata() {
        let mut with_metadata = p256_jwk();
        with_metadata.insert("kid".to_owned(), "1".into());
        with_metadata.insert("use".to_owned(), "sig".into());

        assert!(public_keys_match(&p256_jwk(), &with_metadata));
        assert!(public_keys_match(&with_metadata, &p256_jwk()));
    }

    #[test]
    fn keys_with_different_coordinates_do_not_match() {
        let mut other = p256_jwk();
        other.insert(
            "y".to_owned(),
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".into(),
        );

        assert!(!public_keys_match(&p256_jwk(), &other));
    }

    #[test]
    fn empty_keys_never_match() {
        assert!(!public_keys_match(&JwkPublic::new(), &JwkPublic::new()));
    }

    #[test]
    fn jwk_survives_cose_key_conversion() {
        let cose_key = jwk_to_cose_key(&p256_jwk()).unwrap();

        assert_eq!(cose_key_to_jwk(&cose_key).unwrap(), p256_jwk());
    }

    #[test]
    fn rsa_jwk_is_rejected() {
        let jwk = json_object!({ "kty": "RSA", "n": "0vx7", "e": "AQAB" });

        let err = jwk_to_cose_key(&jwk).unwrap_err();

        assert_matches!(err.error, DocumentError::InvalidArgument(msg) if msg == "only EC keys are supported");
    }

    #[test]
    fn okp_cose_key_is_rejected() {
        let cose_key = coset::CoseKeyBuilder::new_okp_key().build();

        assert_matches!(
            cose_key_to_jwk(&cose_key).unwrap_err().error,
            DocumentError::InvalidArgument(_)
        );
    }
}
