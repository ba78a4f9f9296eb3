use crate::error::SourceError;
use crate::table::Table;
use std::collections::HashMap;
use std::sync::Arc;

/// Supplies immutable tables to a query evaluation.
///
/// Implementations own decoding (files, network, generators); the query core
/// only sees chunked columns. A table lacking one of `required_columns` must
/// fail with [`SourceError::Schema`].
pub trait ColumnarTableSource: Send + Sync {
    /// Loads `name`, restricted to `required_columns` (all columns when empty).
    fn load_table(&self, name: &str, required_columns: &[&str]) -> Result<Arc<Table>, SourceError>;
}

/// Tables held in memory, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct InMemorySource {
    tables: HashMap<String, Arc<Table>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: Table) {
        self.tables.insert(table.name().to_owned(), Arc::new(table));
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.insert(table);
        self
    }

    pub fn table(&self, name: &str) -> Option<&Arc<Table>> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

impl ColumnarTableSource for InMemorySource {
    fn load_table(&self, name: &str, required_columns: &[&str]) -> Result<Arc<Table>, SourceError> {
        let Some(table) = self.tables.get(name) else {
            return Err(SourceError::TableNotFound {
                table: name.to_owned(),
            });
        };
        if required_columns.is_empty() {
            return Ok(table.clone());
        }
        Ok(Arc::new(table.project(required_columns)?))
    }
}

impl<S: ColumnarTableSource + ?Sized> ColumnarTableSource for Arc<S> {
    fn load_table(&self, name: &str, required_columns: &[&str]) -> Result<Arc<Table>, SourceError> {
        (**self).load_table(name, required_columns)
    }
}
