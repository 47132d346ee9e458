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

use std::borrow::Cow;

use bh_jws_utils::{base64_url_encode, JwkPublic};
use serde::{Deserialize, Serialize};

/// Symbolic signature over the given message with the would-be private key
/// corresponding to the given public key, in lieu of a real signature algorithm.
///
/// Tests the important thing: over which message and using which key was the
/// signature produced, regardless of the signature algorithm.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct SymbolicSignature<'m, 'k>(Cow<'m, [u8]>, Cow<'k, JwkPublic>);

impl<'m, 'k> SymbolicSignature<'m, 'k> {
    pub(crate) fn new(message: &'m [u8], public_key: &'k JwkPublic) -> Self {
        Self(Cow::Borrowed(message), Cow::Borrowed(public_key))
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        // a map of strings and a byte array always serialize
        serde_json::to_vec(self).unwrap()
    }

    pub(crate) fn verify(signature: &[u8], message: &[u8], public_key: &JwkPublic) -> bool {
        serde_json::from_slice::<SymbolicSignature>(signature)
            .is_ok_and(|signature| signature == SymbolicSignature::new(message, public_key))
    }
}

/// Symbolic shared secret of the two public keys.
///
/// It doesn't depend on the order of the keys, just like the real key agreement.
pub(crate) fn shared_secret(first: &JwkPublic, second: &JwkPublic) -> Vec<u8> {
    let mut keys = [
        serde_json::to_string(first).unwrap(),
        serde_json::to_string(second).unwrap(),
    ];
    keys.sort();
    keys.join("|").into_bytes()
}

/// A random P-256 public key.
///
/// The coordinates are random bytes, so the point is not on the curve, but symbolic
/// cryptography doesn't care.
pub fn random_public_key() -> JwkPublic {
    let x: [u8; 32] = rand::random();
    let y: [u8; 32] = rand::random();

    let mut jwk = JwkPublic::new();
    jwk.insert("kty".to_owned(), "EC".into());
    jwk.insert("crv".to_owned(), "P-256".into());
    jwk.insert("x".to_owned(), base64_url_encode(x).into());
    jwk.insert("y".to_owned(), base64_url_encode(y).into());
    jwk
}
