//! Top-level facade wiring the storage engine, catalog and SQL pipeline.

use std::sync::Arc;
use tracing::info;

use crate::catalog::CatalogManager;
use crate::error::Result;
use crate::execution::{Executor, PlanNode, Planner};
use crate::parser::{Parser, SemanticAnalyzer, Statement};
use crate::storage::types::Row;
use crate::storage::StorageEngine;
use crate::Config;

/// One open data directory: SQL in, rows out.
///
/// Statements run one at a time to completion. Compile-time errors abort
/// before any page write; execution errors abort the current statement
/// with whatever pages it already dirtied still buffered.
pub struct Database {
    storage: Arc<StorageEngine>,
    catalog: Arc<CatalogManager>,
}

impl Database {
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(StorageEngine::open(&config)?);
        let catalog = Arc::new(CatalogManager::new(storage.clone())?);
        info!(data_dir = %config.data_dir.display(), "database open");
        Ok(Self { storage, catalog })
    }

    /// Compile and execute one statement, collecting its output rows.
    /// DDL/DML yield a single status row.
    pub fn execute_sql(&self, sql: &str) -> Result<Vec<Row>> {
        let plan = self.plan_sql(sql)?;
        Executor::new(&self.storage, &self.catalog).execute(&plan)
    }

    /// Run a whole `;`-separated script, returning the last statement's
    /// rows.
    pub fn execute_script(&self, sql: &str) -> Result<Vec<Row>> {
        let statements = Parser::parse_script(sql)?;
        let mut last = Vec::new();
        for stmt in statements {
            last = self.execute_statement(&stmt)?;
        }
        Ok(last)
    }

    /// Full compile pipeline without execution, for plan inspection.
    pub fn plan_sql(&self, sql: &str) -> Result<PlanNode> {
        let stmt = Parser::parse_statement(sql)?;
        self.compile(&stmt)
    }

    fn compile(&self, stmt: &Statement) -> Result<PlanNode> {
        SemanticAnalyzer::new(&self.catalog).analyze(stmt)?;
        Planner::new(&self.catalog).plan(stmt)
    }

    fn execute_statement(&self, stmt: &Statement) -> Result<Vec<Row>> {
        let plan = self.compile(stmt)?;
        Executor::new(&self.storage, &self.catalog).execute(&plan)
    }

    pub fn storage(&self) -> &StorageEngine {
        &self.storage
    }

    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    /// Write all dirty pages and the metadata sidecar.
    pub fn flush(&self) -> Result<()> {
        self.storage.flush_all()
    }

    /// Clean shutdown: every dirty page reaches its file.
    pub fn close(&self) -> Result<()> {
        self.storage.close()
    }
}
