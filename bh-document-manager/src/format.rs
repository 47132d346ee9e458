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

use std::fmt;

use serde::{Deserialize, Serialize};

/// Format identifier of [ISO/IEC 18013-5:2021][1] documents.
///
/// [1]: <https://www.iso.org/standard/69084.html>
pub const MSO_MDOC_FORMAT: &str = "mso_mdoc";

/// Format identifier of [SD-JWT VC][1] documents.
///
/// [1]: <https://datatracker.ietf.org/doc/draft-ietf-oauth-sd-jwt-vc/>
pub const SD_JWT_VC_FORMAT: &str = "dc+sd-jwt";

/// Legacy format identifier of SD-JWT VC documents, still accepted on decoding.
pub const LEGACY_SD_JWT_VC_FORMAT: &str = "vc+sd-jwt";

/// The format of a document and all of its credentials.
///
/// The format is fixed when the document is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "format")]
pub enum DocumentFormat {
    /// An `mso_mdoc` document of the given `docType`, e.g. `org.iso.18013.5.1.mDL`.
    #[serde(rename = "mso_mdoc", rename_all = "camelCase")]
    MsoMdoc {
        /// The document type asserted by the issuer in the MSO.
        doc_type: String,
    },

    /// An SD-JWT VC document of the given verifiable credential type.
    #[serde(rename = "dc+sd-jwt", alias = "vc+sd-jwt")]
    SdJwtVc {
        /// The `vct` claim asserted by the issuer.
        vct: String,
    },
}

impl DocumentFormat {
    /// Create the `mso_mdoc` format.
    pub fn mso_mdoc(doc_type: impl Into<String>) -> Self {
        Self::MsoMdoc {
            doc_type: doc_type.into(),
        }
    }

    /// Create the SD-JWT VC format.
    pub fn sd_jwt_vc(vct: impl Into<String>) -> Self {
        Self::SdJwtVc { vct: vct.into() }
    }

    /// The format identifier, as used in the OpenID4VC protocols.
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::MsoMdoc { .. } => MSO_MDOC_FORMAT,
            Self::SdJwtVc { .. } => SD_JWT_VC_FORMAT,
        }
    }

    /// The `docType` of an `mso_mdoc` document.
    pub fn doc_type(&self) -> Option<&str> {
        match self {
            Self::MsoMdoc { doc_type } => Some(doc_type),
            Self::SdJwtVc { .. } => None,
        }
    }

    /// The `vct` of an SD-JWT VC document.
    pub fn vct(&self) -> Option<&str> {
        match self {
            Self::MsoMdoc { .. } => None,
            Self::SdJwtVc { vct } => Some(vct),
        }
    }

    /// The type of the document within its format, i.e. the `docType` or the `vct`.
    pub fn document_type(&self) -> &str {
        match self {
            Self::MsoMdoc { doc_type } => doc_type,
            Self::SdJwtVc { vct } => vct,
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identifier(), self.document_type())
    }
}
