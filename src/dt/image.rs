use crate::error::{Error, Result};
use crate::sql::schema::Table;
use crate::sql::types::{Row, Value};

use serde_derive::{Deserialize, Serialize};

/// Whether a field belongs to the table's primary key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    Null,
    PrimaryKey,
}

/// A single column value of a captured row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub key_type: KeyType,
    pub value: Value,
}

/// A captured row
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub fields: Vec<Field>,
}

impl Record {
    /// Looks up a field value by column name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)).map(|f| &f.value)
    }
}

/// A row image: a snapshot of zero or more rows of one table, taken either
/// before or after a statement executed. All rows share the same column set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableRecords {
    pub table_name: String,
    /// Primary key column names, in table column order.
    pub primary_keys: Vec<String>,
    pub rows: Vec<Record>,
}

impl TableRecords {
    /// Creates an empty image for a table. Errors if the table has no primary
    /// key, since its rows could neither be locked nor compensated.
    pub fn empty(table: &Table) -> Result<Self> {
        Ok(Self {
            table_name: table.name.clone(),
            primary_keys: table.get_primary_key_names()?,
            rows: Vec::new(),
        })
    }

    /// Builds an image from whole rows in table column order.
    pub fn from_rows(table: &Table, rows: Vec<Row>) -> Result<Self> {
        let columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        Self::from_columns(table, &columns, rows)
    }

    /// Builds an image from rows laid out as the given columns, e.g. a result
    /// set projection.
    pub fn from_columns(table: &Table, columns: &[String], rows: Vec<Row>) -> Result<Self> {
        let mut image = Self::empty(table)?;
        let columns = columns
            .iter()
            .map(|name| {
                let column = table.get_column(name)?;
                let key_type = match column.primary_key {
                    true => KeyType::PrimaryKey,
                    false => KeyType::Null,
                };
                Ok((column.name.clone(), key_type))
            })
            .collect::<Result<Vec<_>>>()?;
        for row in rows {
            if row.len() != columns.len() {
                return Err(Error::ImageCapture(format!(
                    "row of table {} has {} values, expected {}",
                    table.name,
                    row.len(),
                    columns.len()
                )));
            }
            let fields = columns
                .iter()
                .zip(row)
                .map(|((name, key_type), value)| Field {
                    name: name.clone(),
                    key_type: *key_type,
                    value,
                })
                .collect();
            image.push(Record { fields })?;
        }
        Ok(image)
    }

    /// Appends a row, enforcing that it has the same column set as the others
    pub fn push(&mut self, record: Record) -> Result<()> {
        if let Some(first) = self.rows.first() {
            let same = first.fields.len() == record.fields.len()
                && first.fields.iter().zip(&record.fields).all(|(a, b)| a.name == b.name);
            if !same {
                return Err(Error::Internal(format!(
                    "row column set differs within image of table {}",
                    self.table_name
                )));
            }
        }
        self.rows.push(record);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns the primary key values of every row, ordered as
    /// `primary_keys`. Errors if any row lacks a primary key column or holds a
    /// NULL key.
    pub fn primary_key_values(&self) -> Result<Vec<Vec<Value>>> {
        self.rows
            .iter()
            .map(|row| {
                self.primary_keys
                    .iter()
                    .map(|name| match row.get(name) {
                        Some(Value::Null) | None => Err(Error::Value(format!(
                            "row of table {} has no complete primary key",
                            self.table_name
                        ))),
                        Some(value) => Ok(value.clone()),
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::schema::Column;
    use crate::sql::types::DataType;

    fn table() -> Table {
        Table::new(
            "t",
            vec![
                Column::new("id", DataType::Integer).primary_key(),
                Column::new("v", DataType::Integer),
            ],
        )
        .unwrap()
    }

    #[test]
    fn from_rows() -> Result<()> {
        let rows = vec![vec![Value::Integer(1), Value::Integer(10)]];
        let image = TableRecords::from_rows(&table(), rows)?;
        assert_eq!(image.table_name, "t");
        assert_eq!(image.primary_keys, vec!["id"]);
        assert_eq!(image.rows[0].get("V"), Some(&Value::Integer(10)));
        assert_eq!(image.primary_key_values()?, vec![vec![Value::Integer(1)]]);
        Ok(())
    }

    #[test]
    fn projection_without_key() -> Result<()> {
        let rows = vec![vec![Value::Integer(10)]];
        let image = TableRecords::from_columns(&table(), &["v".to_string()], rows)?;
        assert!(image.primary_key_values().is_err());
        Ok(())
    }

    #[test]
    fn mixed_column_sets() -> Result<()> {
        let rows = vec![vec![Value::Integer(1), Value::Integer(10)]];
        let mut image = TableRecords::from_rows(&table(), rows)?;
        let odd = Record {
            fields: vec![Field {
                name: "v".into(),
                key_type: KeyType::Null,
                value: Value::Integer(3),
            }],
        };
        assert!(image.push(odd).is_err());
        Ok(())
    }
}
