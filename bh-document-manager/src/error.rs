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

//! This module defines the error values returned by the crate API.

use crate::{secure_area::SecureAreaError, storage::StorageError};

/// Error type used across the crate API.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum DocumentError {
    /// The caller supplied an argument which cannot be accepted, e.g. a credential count
    /// mismatch, an unknown public key alias or a device key not matching the issued one.
    #[strum(to_string = "Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested document, credential or secure area does not exist.
    #[strum(to_string = "Not found: {0}")]
    NotFound(String),

    /// The key is locked; the operation can be retried with unlock data.
    #[strum(to_string = "Key is locked")]
    KeyLocked,

    /// The key has been invalidated by the secure area and cannot be used anymore.
    #[strum(to_string = "Key has been invalidated")]
    KeyInvalidated,

    /// No credential of the document is eligible for use, e.g. all one-time credentials have
    /// been consumed or none of them is valid at the requested time.
    #[strum(to_string = "No valid credential found")]
    NoValidCredential,

    /// The operation is not allowed in the current lifecycle state.
    #[strum(to_string = "Illegal state: {0}")]
    IllegalState(String),

    /// The document store failed.
    #[strum(to_string = "Storage error")]
    Storage,

    /// The secure area failed for a reason other than a locked or invalidated key.
    #[strum(to_string = "Secure area error")]
    SecureArea,

    /// Encoding or decoding of a persisted blob failed.
    #[strum(to_string = "Serialization error")]
    Serialization,
}

impl bherror::BhError for DocumentError {}

impl DocumentError {
    /// Maps a [`SecureAreaError`] to the closest [`DocumentError`].
    pub(crate) fn from_secure_area(error: &SecureAreaError) -> Self {
        match error {
            SecureAreaError::KeyLocked => Self::KeyLocked,
            SecureAreaError::KeyInvalidated => Self::KeyInvalidated,
            SecureAreaError::KeyNotFound(_)
            | SecureAreaError::InvalidSettings
            | SecureAreaError::Operation => Self::SecureArea,
        }
    }

    /// Maps a [`StorageError`] to the closest [`DocumentError`].
    pub(crate) fn from_storage(error: &StorageError) -> Self {
        match error {
            StorageError::DocumentNotFound(id) => Self::NotFound(format!("document `{id}`")),
            StorageError::DocumentAlreadyExists(id) => {
                Self::IllegalState(format!("document `{id}` already exists"))
            }
            StorageError::Backend => Self::Storage,
        }
    }
}

/// Type alias for [`bherror::Result`] types returned by the crate's API.
pub type Result<T> = bherror::Result<T, DocumentError>;
