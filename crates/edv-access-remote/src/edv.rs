//! EDV service client implementing [`EdvStore`] over HTTP.

use async_trait::async_trait;
use reqwest::Method;

use edv_access_core::{BlindedQuery, DocumentId, EncryptedDocument, Invocation};
use edv_access_store::{EdvStore, Result as StoreResult, VaultInfo};

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::http::{optional, HttpClient};

/// A remote vault.
///
/// Routes hang off the vault's documents collection URL:
/// `POST {documents}` inserts, `POST {documents}/{id}` updates,
/// `POST {documents}/query` finds.
pub struct HttpEdv {
    vault: VaultInfo,
    http: HttpClient,
}

impl HttpEdv {
    pub fn new(vault: VaultInfo, config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            vault,
            http: HttpClient::new(config)?,
        })
    }

    async fn get_remote(
        &self,
        id: &DocumentId,
        invocation: &Invocation,
    ) -> Result<Option<EncryptedDocument>> {
        let url = self.http.url(&self.vault.documents, &[id.as_str()])?;
        let request = HttpClient::invoke(self.http.request(Method::GET, url), invocation)?;
        optional(self.http.get_json(request).await)
    }

    async fn delete_remote(&self, id: &DocumentId, invocation: &Invocation) -> Result<bool> {
        let url = self.http.url(&self.vault.documents, &[id.as_str()])?;
        let request = HttpClient::invoke(self.http.request(Method::DELETE, url), invocation)?;
        self.http.delete(request).await
    }
}

#[async_trait]
impl EdvStore for HttpEdv {
    fn vault(&self) -> &VaultInfo {
        &self.vault
    }

    async fn insert(&self, doc: &EncryptedDocument, invocation: &Invocation) -> StoreResult<()> {
        let url = self.http.url(&self.vault.documents, &[])?;
        Ok(self.http.post_empty(url, doc, Some(invocation)).await?)
    }

    async fn update(&self, doc: &EncryptedDocument, invocation: &Invocation) -> StoreResult<()> {
        let url = self.http.url(&self.vault.documents, &[doc.id.as_str()])?;
        Ok(self.http.post_empty(url, doc, Some(invocation)).await?)
    }

    async fn get(
        &self,
        id: &DocumentId,
        invocation: &Invocation,
    ) -> StoreResult<Option<EncryptedDocument>> {
        Ok(self.get_remote(id, invocation).await?)
    }

    async fn find(
        &self,
        query: &BlindedQuery,
        invocation: &Invocation,
    ) -> StoreResult<Vec<EncryptedDocument>> {
        let url = self.http.url(&self.vault.documents, &["query"])?;
        Ok(self.http.post_json(url, query, Some(invocation)).await?)
    }

    async fn delete(&self, id: &DocumentId, invocation: &Invocation) -> StoreResult<bool> {
        Ok(self.delete_remote(id, invocation).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_hang_off_documents_collection() {
        let vault = VaultInfo::new("z1", "urn:key:ed25519:00", "https://edv.example");
        let edv = HttpEdv::new(vault, &ServiceConfig::new("https://edv.example")).unwrap();

        let doc = edv.http.url(&edv.vault.documents, &["zabc"]).unwrap();
        assert_eq!(doc.as_str(), "https://edv.example/edvs/z1/documents/zabc");
        let query = edv.http.url(&edv.vault.documents, &["query"]).unwrap();
        assert_eq!(query.as_str(), "https://edv.example/edvs/z1/documents/query");
    }
}
