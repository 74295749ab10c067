use super::{Backend, ExecResult};
use crate::error::{Error, Result};
use crate::sql::parser::ast::{
    DeleteStatement, Expression, InsertStatement, SelectStatement, Statement, UpdateStatement,
};
use crate::sql::plan::Node;
use crate::sql::schema::{Catalog, Table};
use crate::sql::types::{Row, Value};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Display;

/// An in-memory backend. Rows are keyed by primary key; a local transaction
/// snapshots every table on BEGIN and restores it on ROLLBACK.
pub struct Memory {
    resource_id: String,
    tables: BTreeMap<String, MemoryTable>,
    snapshot: Option<BTreeMap<String, MemoryTable>>,
}

#[derive(Clone, Debug)]
struct MemoryTable {
    schema: Table,
    rows: BTreeMap<Vec<Value>, Row>,
    next_id: i64,
}

impl Display for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "memory({})", self.resource_id)
    }
}

impl Memory {
    /// Creates a new, empty backend for the given data source
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            tables: BTreeMap::new(),
            snapshot: None,
        }
    }

    /// Whether a local transaction is open
    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Returns all rows of a table, in primary key order
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self.table(table)?.rows.values().cloned().collect())
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::Value(format!("Table {} does not exist", name)))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable> {
        self.tables
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| Error::Value(format!("Table {} does not exist", name)))
    }

    fn insert(&mut self, stmt: &InsertStatement, args: &[Value]) -> Result<ExecResult> {
        let table = self.table_mut(&stmt.table)?;
        let schema = table.schema.clone();
        let columns = match &stmt.columns {
            Some(columns) => columns
                .iter()
                .map(|c| schema.get_column_index(c))
                .collect::<Result<Vec<_>>>()?,
            None => (0..schema.columns.len()).collect(),
        };

        let mut last_insert_id = 0;
        let mut affected_rows = 0;
        for expressions in &stmt.values {
            if expressions.len() != columns.len() {
                return Err(Error::Value("Column and value counts do not match".into()));
            }
            let mut row: Row = schema
                .columns
                .iter()
                .map(|c| c.default.clone().unwrap_or(Value::Null))
                .collect();
            for (index, expr) in columns.iter().zip(expressions) {
                row[*index] = expr.evaluate(None, args)?;
            }
            for (index, column) in schema.columns.iter().enumerate() {
                if !column.auto_increment {
                    continue;
                }
                match row[index] {
                    Value::Null => {
                        row[index] = Value::Integer(table.next_id);
                        if last_insert_id == 0 {
                            last_insert_id = table.next_id as u64;
                        }
                        table.next_id += 1;
                    }
                    Value::Integer(id) if id >= table.next_id => table.next_id = id + 1,
                    _ => {}
                }
            }
            schema.validate_row(&row)?;
            let key = schema.get_row_key(&row)?;
            if table.rows.contains_key(&key) {
                return Err(Error::Value(format!(
                    "Duplicate entry for primary key of table {}",
                    schema.name
                )));
            }
            table.rows.insert(key, row);
            affected_rows += 1;
        }
        Ok(ExecResult::Affected {
            affected_rows,
            last_insert_id,
        })
    }

    fn update(&mut self, stmt: &UpdateStatement, args: &[Value]) -> Result<ExecResult> {
        let table = self.table_mut(&stmt.table)?;
        let schema = table.schema.clone();
        let set = stmt
            .set
            .iter()
            .map(|(c, e)| Ok((schema.get_column_index(c)?, e)))
            .collect::<Result<Vec<_>>>()?;

        let matched = matching(&schema, table.rows.values(), stmt.r#where.as_ref(), args)?;
        let mut updates = Vec::with_capacity(matched.len());
        for row in matched {
            let mut new = row.clone();
            for (index, expr) in &set {
                new[*index] = expr.evaluate(Some((&schema, &row)), args)?;
            }
            schema.validate_row(&new)?;
            updates.push((schema.get_row_key(&row)?, new));
        }
        let affected_rows = updates.len() as u64;
        for (old_key, row) in updates {
            let new_key = schema.get_row_key(&row)?;
            if new_key != old_key {
                if table.rows.contains_key(&new_key) {
                    return Err(Error::Value(format!(
                        "Duplicate entry for primary key of table {}",
                        schema.name
                    )));
                }
                table.rows.remove(&old_key);
            }
            table.rows.insert(new_key, row);
        }
        Ok(ExecResult::affected(affected_rows))
    }

    fn delete(&mut self, stmt: &DeleteStatement, args: &[Value]) -> Result<ExecResult> {
        let table = self.table_mut(&stmt.table)?;
        let matched = matching(&table.schema, table.rows.values(), stmt.r#where.as_ref(), args)?;
        let keys =
            matched.iter().map(|row| table.schema.get_row_key(row)).collect::<Result<Vec<_>>>()?;
        for key in &keys {
            table.rows.remove(key);
        }
        Ok(ExecResult::affected(keys.len() as u64))
    }

    fn select(&self, stmt: &SelectStatement, args: &[Value]) -> Result<ExecResult> {
        let table = self.table(&stmt.table)?;
        let rows = matching(&table.schema, table.rows.values(), stmt.r#where.as_ref(), args)?;
        let Some(columns) = &stmt.columns else {
            return Ok(ExecResult::Rows {
                columns: table.schema.columns.iter().map(|c| c.name.clone()).collect(),
                rows,
            });
        };
        let indexes = columns
            .iter()
            .map(|c| table.schema.get_column_index(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(ExecResult::Rows {
            columns: columns.clone(),
            rows: rows
                .into_iter()
                .map(|row| indexes.iter().map(|i| row[*i].clone()).collect())
                .collect(),
        })
    }
}

/// Returns the rows satisfying an optional filter
fn matching<'a>(
    schema: &Table,
    rows: impl Iterator<Item = &'a Row>,
    filter: Option<&Expression>,
    args: &[Value],
) -> Result<Vec<Row>> {
    let mut matched = Vec::new();
    for row in rows {
        let keep = match filter {
            Some(filter) => filter.evaluate(Some((schema, row)), args)?.is_true(),
            None => true,
        };
        if keep {
            matched.push(row.clone());
        }
    }
    Ok(matched)
}

impl Catalog for Memory {
    fn create_table(&mut self, table: Table) -> Result<()> {
        table.validate()?;
        let name = table.name.to_lowercase();
        if self.tables.contains_key(&name) {
            return Err(Error::Value(format!("Table {} already exists", table.name)));
        }
        self.tables.insert(name, MemoryTable {
            schema: table,
            rows: BTreeMap::new(),
            next_id: 1,
        });
        Ok(())
    }

    fn delete_table(&mut self, table: &str) -> Result<()> {
        self.tables
            .remove(&table.to_lowercase())
            .map(|_| ())
            .ok_or_else(|| Error::Value(format!("Table {} does not exist", table)))
    }

    fn read_table(&self, table: &str) -> Result<Option<Table>> {
        Ok(self.tables.get(&table.to_lowercase()).map(|t| t.schema.clone()))
    }
}

#[async_trait]
impl Backend for Memory {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    async fn table_meta(&mut self, table: &str) -> Result<Table> {
        self.must_read_table(table)
    }

    async fn query(&mut self, node: &Node, args: &[Value]) -> Result<Vec<Row>> {
        match node {
            // Rows are already exclusively owned by this connection, so FOR UPDATE is a no-op.
            Node::Scan { table, filter, .. } => {
                let table = self.table(table)?;
                matching(&table.schema, table.rows.values(), filter.as_ref(), args)
            }
            Node::KeyLookup { table, key_columns, keys } => {
                let table = self.table(table)?;
                let indexes = key_columns
                    .iter()
                    .map(|c| table.schema.get_column_index(c))
                    .collect::<Result<Vec<_>>>()?;
                let mut rows = Vec::with_capacity(keys.len());
                for key in keys {
                    if key.len() != indexes.len() {
                        return Err(Error::Value("Key lookup arity mismatch".into()));
                    }
                    rows.extend(
                        table
                            .rows
                            .values()
                            .filter(|row| indexes.iter().zip(key).all(|(i, v)| &row[*i] == v))
                            .cloned(),
                    );
                }
                Ok(rows)
            }
        }
    }

    async fn execute(&mut self, statement: &Statement, args: &[Value]) -> Result<ExecResult> {
        match statement {
            Statement::Begin => {
                self.begin().await?;
                Ok(ExecResult::affected(0))
            }
            Statement::Commit => {
                self.commit().await?;
                Ok(ExecResult::affected(0))
            }
            Statement::Rollback => {
                self.rollback().await?;
                Ok(ExecResult::affected(0))
            }
            Statement::Insert(stmt) => self.insert(stmt, args),
            Statement::Update(stmt) => self.update(stmt, args),
            Statement::Delete(stmt) => self.delete(stmt, args),
            Statement::Select(stmt) => self.select(stmt, args),
        }
    }

    async fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_none() {
            self.snapshot = Some(self.tables.clone());
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.tables = snapshot;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parser::ast::Operation;
    use crate::sql::schema::Column;
    use crate::sql::types::DataType;

    fn setup() -> Result<Memory> {
        let mut db = Memory::new("jdbc:mysql://db/test");
        db.create_table(Table::new(
            "t",
            vec![
                Column::new("id", DataType::Integer).primary_key().auto_increment(),
                Column::new("v", DataType::Integer),
            ],
        )?)?;
        Ok(db)
    }

    fn id_eq(param: usize) -> Option<Expression> {
        Some(Expression::Operation(Operation::Equal(
            Box::new(Expression::Field("id".into())),
            Box::new(Expression::Parameter(param)),
        )))
    }

    #[tokio::test]
    async fn auto_increment() -> Result<()> {
        let mut db = setup()?;
        let insert = Statement::Insert(InsertStatement {
            table: "t".into(),
            hints: vec![],
            columns: Some(vec!["v".into()]),
            values: vec![vec![Expression::Parameter(0)], vec![Expression::Parameter(1)]],
        });
        let result = db.execute(&insert, &[Value::Integer(1), Value::Integer(2)]).await?;
        assert_eq!(result, ExecResult::Affected {
            affected_rows: 2,
            last_insert_id: 1,
        });
        assert_eq!(
            db.rows("t")?,
            vec![
                vec![Value::Integer(1), Value::Integer(1)],
                vec![Value::Integer(2), Value::Integer(2)]
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn update_delete_and_rollback() -> Result<()> {
        let mut db = setup()?;
        db.execute(
            &Statement::Insert(InsertStatement {
                table: "t".into(),
                hints: vec![],
                columns: None,
                values: vec![vec![Value::Integer(1).into(), Value::Integer(10).into()]],
            }),
            &[],
        )
        .await?;

        db.begin().await?;
        let update = Statement::Update(UpdateStatement {
            table: "t".into(),
            hints: vec![],
            set: vec![("v".into(), Expression::Parameter(0))],
            r#where: id_eq(1),
        });
        assert_eq!(
            db.execute(&update, &[Value::Integer(20), Value::Integer(1)]).await?,
            ExecResult::affected(1)
        );
        assert_eq!(db.rows("t")?, vec![vec![Value::Integer(1), Value::Integer(20)]]);

        let delete = Statement::Delete(DeleteStatement {
            table: "t".into(),
            hints: vec![],
            r#where: id_eq(0),
        });
        assert_eq!(db.execute(&delete, &[Value::Integer(1)]).await?, ExecResult::affected(1));
        assert!(db.rows("t")?.is_empty());

        db.rollback().await?;
        assert_eq!(db.rows("t")?, vec![vec![Value::Integer(1), Value::Integer(10)]]);
        Ok(())
    }

    #[tokio::test]
    async fn key_lookup() -> Result<()> {
        let mut db = setup()?;
        db.execute(
            &Statement::Insert(InsertStatement {
                table: "t".into(),
                hints: vec![],
                columns: Some(vec!["v".into()]),
                values: vec![vec![Value::Integer(5).into()], vec![Value::Integer(6).into()]],
            }),
            &[],
        )
        .await?;
        let rows = db
            .query(
                &Node::KeyLookup {
                    table: "t".into(),
                    key_columns: vec!["id".into()],
                    keys: vec![vec![Value::Integer(2)], vec![Value::Integer(9)]],
                },
                &[],
            )
            .await?;
        assert_eq!(rows, vec![vec![Value::Integer(2), Value::Integer(6)]]);
        Ok(())
    }
}
