use deadpool_postgres::Object;
use tracing::debug;

use crate::domain::{DomainError, DomainResult};

/// A transaction that owns its pooled connection.
///
/// If dropped before [`commit`](Self::commit), the connection is detached from
/// the pool and closed, so PostgreSQL aborts the transaction and releases its
/// row locks. This also covers a request future cancelled mid-statement.
pub struct OwnedTransaction {
    conn: Option<Object>,
}

impl OwnedTransaction {
    pub async fn begin(conn: Object) -> DomainResult<Self> {
        conn.batch_execute("BEGIN")
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;
        Ok(Self { conn: Some(conn) })
    }

    pub fn client(&self) -> DomainResult<&Object> {
        self.conn.as_ref().ok_or_else(|| {
            DomainError::RepositoryError(anyhow::anyhow!("transaction already committed"))
        })
    }

    pub async fn commit(&mut self) -> DomainResult<()> {
        self.client()?
            .batch_execute("COMMIT")
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;
        // Only hand the connection back once COMMIT went through.
        self.conn.take();
        Ok(())
    }
}

impl Drop for OwnedTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("transaction dropped without commit, closing connection");
            drop(Object::take(conn));
        }
    }
}
