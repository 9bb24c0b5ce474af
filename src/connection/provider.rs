//! Schema introspection over the worker RPC boundary.
//!
//! Trimmed from the teacher's `metadata::MetadataProvider`: no relationship
//! inference, no value-overlap validation, no column statistics. The
//! registry only needs tables, columns (nullable/PK), and declared foreign
//! keys for the schema snapshot.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::worker::protocol::{SchemaInfo, TableDetailInfo, TableInfo};
use crate::worker::{WorkerClient, WorkerResult};

#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn list_schemas(&self) -> WorkerResult<Vec<SchemaInfo>>;
    async fn list_tables(&self, schema: &str) -> WorkerResult<Vec<TableInfo>>;
    async fn get_table(&self, schema: &str, table: &str) -> WorkerResult<TableDetailInfo>;

    /// Fetch full detail for every table in every schema. Default
    /// implementation fans the per-table fetches out in parallel, the way
    /// `MetadataProviderExt::introspect_schema` does.
    async fn introspect_all(&self) -> WorkerResult<(Vec<SchemaInfo>, Vec<TableDetailInfo>)> {
        let schemas = self.list_schemas().await?;

        let table_lists = join_all(schemas.iter().map(|s| self.list_tables(&s.name))).await;
        let mut table_refs = Vec::new();
        for (schema, tables) in schemas.iter().zip(table_lists) {
            for t in tables? {
                table_refs.push((schema.name.clone(), t.name));
            }
        }

        let details = join_all(
            table_refs
                .iter()
                .map(|(schema, table)| self.get_table(schema, table)),
        )
        .await;

        let tables = details.into_iter().collect::<WorkerResult<Vec<_>>>()?;
        Ok((schemas, tables))
    }
}

/// `SchemaProvider` backed by a live `WorkerClient` connection to a dialect
/// driver process.
pub struct WorkerSchemaProvider {
    client: Arc<WorkerClient>,
    driver: String,
    connection_string: String,
}

impl WorkerSchemaProvider {
    pub fn new(client: Arc<WorkerClient>, driver: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            client,
            driver: driver.into(),
            connection_string: connection_string.into(),
        }
    }
}

#[async_trait]
impl SchemaProvider for WorkerSchemaProvider {
    async fn list_schemas(&self) -> WorkerResult<Vec<SchemaInfo>> {
        let response = self
            .client
            .list_schemas(&self.driver, &self.connection_string)
            .await?;
        Ok(response.schemas)
    }

    async fn list_tables(&self, schema: &str) -> WorkerResult<Vec<TableInfo>> {
        let response = self
            .client
            .list_tables(&self.driver, &self.connection_string, Some(schema))
            .await?;
        Ok(response.tables)
    }

    async fn get_table(&self, schema: &str, table: &str) -> WorkerResult<TableDetailInfo> {
        let response = self
            .client
            .get_table(&self.driver, &self.connection_string, schema, table)
            .await?;
        Ok(response.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_provider_is_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_worker_schema_provider_is_send_sync() {
        _assert_provider_is_send_sync::<WorkerSchemaProvider>();
    }
}
