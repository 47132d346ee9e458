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

use serde::{Deserialize, Serialize};

use crate::{
    credential::{Credential, CredentialStore},
    secure_area::SecureArea,
    Result,
};

/// How the credentials of a document are retired once used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialPolicy {
    /// Each credential is used at most once and deleted right after, so that presentations
    /// cannot be linked by the credential key.
    OneTimeUse,

    /// Credentials are used over and over, the least used one first.
    #[default]
    RotateUse,
}

impl CredentialPolicy {
    /// Whether a credential used `usage_count` times may still be used under this policy.
    pub fn allows_use(self, usage_count: u64) -> bool {
        match self {
            Self::OneTimeUse => usage_count == 0,
            Self::RotateUse => true,
        }
    }

    /// Update the credential after it has been successfully used.
    ///
    /// The caller must hold the credential lock.
    pub(crate) async fn apply(
        self,
        credentials: &CredentialStore<'_>,
        secure_area: &dyn SecureArea,
        mut credential: Credential,
    ) -> Result<()> {
        match self {
            Self::OneTimeUse => {
                credentials.remove(credential.alias()).await?;

                // the record is gone, so the credential can't be selected again either way
                if let Err(error) = secure_area.delete_key(credential.alias()).await {
                    tracing::warn!(
                        alias = credential.alias(),
                        %error,
                        "Failed to delete the key of a used one-time credential"
                    );
                }
            }
            Self::RotateUse => {
                credential.increment_usage_count();
                credentials.put(&credential).await?;
            }
        }

        tracing::debug!(
            alias = credential.alias(),
            policy = ?self,
            "Credential policy applied"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        format::DocumentFormat,
        secure_area::CreateKeySettings,
        storage::{DocumentStore as _, InMemoryStorage},
        test_utils::InMemorySecureArea,
    };

    async fn certified_credential(
        secure_area: &InMemorySecureArea,
        credentials: &CredentialStore<'_>,
    ) -> Credential {
        let batch = secure_area
            .batch_create_key(1, &CreateKeySettings::default())
            .await
            .unwrap();

        let mut credential = Credential::new(
            batch.keys[0].alias.clone(),
            secure_area.identifier().to_owned(),
            "manager".to_owned(),
            DocumentFormat::sd_jwt_vc("urn:eudi:pid:1"),
            0,
        );
        credential.certify(vec![1], Utc::now(), Utc::now()).unwrap();
        credentials.put(&credential).await.unwrap();
        credential
    }

    #[test]
    fn default_policy_is_rotate_use() {
        assert_eq!(CredentialPolicy::default(), CredentialPolicy::RotateUse);
    }

    #[test]
    fn one_time_use_allows_only_unused_credentials() {
        assert!(CredentialPolicy::OneTimeUse.allows_use(0));
        assert!(!CredentialPolicy::OneTimeUse.allows_use(1));
        assert!(CredentialPolicy::RotateUse.allows_use(42));
    }

    #[tokio::test]
    async fn one_time_use_deletes_the_credential_and_its_key() {
        let secure_area = InMemorySecureArea::new("software");
        let store = InMemoryStorage::new().scoped("manager");
        store.create_document("doc").await.unwrap();
        let credentials = CredentialStore::new(&store, "doc");
        let credential = certified_credential(&secure_area, &credentials).await;
        let alias = credential.alias().to_owned();

        CredentialPolicy::OneTimeUse
            .apply(&credentials, &secure_area, credential)
            .await
            .unwrap();

        assert_eq!(credentials.get(&alias).await.unwrap(), None);
        assert!(!secure_area.contains(&alias));
    }

    #[tokio::test]
    async fn rotate_use_increments_the_usage_count_once() {
        let secure_area = InMemorySecureArea::new("software");
        let store = InMemoryStorage::new().scoped("manager");
        store.create_document("doc").await.unwrap();
        let credentials = CredentialStore::new(&store, "doc");
        let credential = certified_credential(&secure_area, &credentials).await;
        let alias = credential.alias().to_owned();

        CredentialPolicy::RotateUse
            .apply(&credentials, &secure_area, credential)
            .await
            .unwrap();

        let stored = credentials.get(&alias).await.unwrap().unwrap();
        assert_eq!(stored.usage_count(), 1);
        assert!(secure_area.contains(&alias));
    }
}
