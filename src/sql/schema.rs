use super::types::{DataType, Value};
use crate::error::{Error, Result};

use serde_derive::{Deserialize, Serialize};

/// The catalog stores schema information
pub trait Catalog {
    /// Creates a new table
    fn create_table(&mut self, table: Table) -> Result<()>;

    /// Deletes an existing table, or errors if it does not exist
    fn delete_table(&mut self, table: &str) -> Result<()>;

    /// Reads a table, if it exists
    fn read_table(&self, table: &str) -> Result<Option<Table>>;

    /// Reads a table, and errors if it does not exist
    fn must_read_table(&self, table: &str) -> Result<Table> {
        self.read_table(table)?
            .ok_or_else(|| Error::Value(format!("Table {} does not exist", table)))
    }
}

/// A table schema
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    /// Creates a new table schema
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let table = Self {
            name: name.into(),
            columns,
        };
        table.validate()?;
        Ok(table)
    }

    /// Fetches a column by name
    pub fn get_column(&self, name: &str) -> Result<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)).ok_or_else(|| {
            Error::Value(format!("Column {} not found in table {}", name, self.name))
        })
    }

    /// Fetches a column index by name
    pub fn get_column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                Error::Value(format!("Column {} not found in table {}", name, self.name))
            })
    }

    /// Returns the primary key columns of the table, in column order.
    /// Errors if the table has none, since rows without a key can't be locked.
    pub fn get_primary_keys(&self) -> Result<Vec<&Column>> {
        let keys: Vec<&Column> = self.columns.iter().filter(|c| c.primary_key).collect();
        if keys.is_empty() {
            return Err(Error::Value(format!("Primary key not found in table {}", self.name)));
        }
        Ok(keys)
    }

    /// Returns the primary key column names of the table
    pub fn get_primary_key_names(&self) -> Result<Vec<String>> {
        Ok(self.get_primary_keys()?.into_iter().map(|c| c.name.clone()).collect())
    }

    /// Returns the primary key value(s) of a row
    pub fn get_row_key(&self, row: &[Value]) -> Result<Vec<Value>> {
        self.columns
            .iter()
            .zip(row.iter())
            .filter(|(c, _)| c.primary_key)
            .map(|(_, v)| match v {
                Value::Null => Err(Error::Value("Primary key value not found for row".into())),
                v => Ok(v.clone()),
            })
            .collect()
    }

    /// Validates the table schema
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::Value(format!("Table {} has no columns", self.name)));
        }
        self.get_primary_keys()?;
        if self.columns.iter().filter(|c| c.auto_increment).count() > 1 {
            return Err(Error::Value(format!(
                "Multiple auto-increment columns in table {}",
                self.name
            )));
        }
        for column in &self.columns {
            column.validate()?;
        }
        Ok(())
    }

    /// Validates a row
    pub fn validate_row(&self, row: &[Value]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::Value(format!("Invalid row size for table {}", self.name)));
        }
        for (column, value) in self.columns.iter().zip(row.iter()) {
            column.validate_value(value)?;
        }
        Ok(())
    }
}

/// A table column schema
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Column datatype
    pub datatype: DataType,
    /// Whether the column is part of the primary key
    pub primary_key: bool,
    /// Whether the column allows null values
    pub nullable: bool,
    /// The default value of the column
    pub default: Option<Value>,
    /// Whether the backend generates values for the column on insert
    pub auto_increment: bool,
}

impl Column {
    /// Creates a non-nullable column without default
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            datatype,
            primary_key: false,
            nullable: false,
            default: None,
            auto_increment: false,
        }
    }

    /// Marks the column as (part of) the primary key
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Marks the column as auto-incrementing
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Marks the column as nullable, defaulting to NULL
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self.default = Some(Value::Null);
        self
    }

    /// Validates the column schema
    pub fn validate(&self) -> Result<()> {
        if self.primary_key && self.nullable {
            return Err(Error::Value(format!("Primary key {} cannot be nullable", self.name)));
        }
        if self.auto_increment && self.datatype != DataType::Integer {
            return Err(Error::Value(format!(
                "Auto-increment column {} must be INTEGER",
                self.name
            )));
        }
        if let Some(default) = &self.default {
            match default.datatype() {
                Some(datatype) if datatype != self.datatype => {
                    return Err(Error::Value(format!(
                        "Default value for column {} has datatype {}, must be {}",
                        self.name, datatype, self.datatype
                    )))
                }
                None if !self.nullable => {
                    return Err(Error::Value(format!(
                        "Can't use NULL as default value for non-nullable column {}",
                        self.name
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validates a column value
    pub fn validate_value(&self, value: &Value) -> Result<()> {
        match value.datatype() {
            None if self.nullable => Ok(()),
            None => Err(Error::Value(format!("NULL value not allowed for column {}", self.name))),
            Some(DataType::Integer) if self.datatype == DataType::Float => Ok(()),
            Some(ref datatype) if datatype != &self.datatype => Err(Error::Value(format!(
                "Invalid datatype {} for {} column {}",
                datatype, self.datatype, self.name
            ))),
            _ => Ok(()),
        }
    }
}
