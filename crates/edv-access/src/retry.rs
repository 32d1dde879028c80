//! Read-modify-write with conflict retry.

use tokio::time::{sleep, timeout};
use tracing::debug;

use edv_access_core::{Document, DocumentId};

use crate::client::EncryptedDocumentClient;
use crate::config::RetryPolicy;
use crate::error::{AccessError, Result};

/// Apply `mutate` to the current version of a document until a write sticks.
///
/// Each round re-reads the document and calls `mutate`; returning `false`
/// means the desired state is already stored and ends the loop without a
/// write. A conflicting write backs off and starts a new round; any other
/// error is returned at once. The loop gives up after
/// `policy.max_attempts` writes with `RetryExhausted`, or when
/// `policy.deadline` passes with `Timeout`.
pub async fn read_modify_write<F>(
    client: &EncryptedDocumentClient,
    id: &DocumentId,
    policy: &RetryPolicy,
    mut mutate: F,
) -> Result<Document>
where
    F: FnMut(&mut Document) -> bool,
{
    timeout(policy.deadline, rounds(client, id, policy, &mut mutate))
        .await
        .map_err(|_| {
            AccessError::Timeout(format!("{} not written within {:?}", id, policy.deadline))
        })?
}

async fn rounds<F>(
    client: &EncryptedDocumentClient,
    id: &DocumentId,
    policy: &RetryPolicy,
    mutate: &mut F,
) -> Result<Document>
where
    F: FnMut(&mut Document) -> bool,
{
    let mut attempts = 0u32;
    loop {
        let mut doc = client.read(id).await?;
        if !mutate(&mut doc) {
            return Ok(doc);
        }
        if attempts >= policy.max_attempts {
            return Err(AccessError::RetryExhausted { attempts });
        }
        attempts += 1;

        match client.write(&doc).await {
            Ok(written) => return Ok(written),
            Err(e) if e.is_conflict() => {
                let pause = policy.backoff(attempts);
                debug!(id = %id, attempts, ?pause, "write conflict, retrying");
                sleep(pause).await;
            }
            Err(e) => return Err(e),
        }
    }
}
