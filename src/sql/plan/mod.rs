use super::parser::ast::Expression;
use super::parser::format_ident;
use super::types::Value;

use serde_derive::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A read plan node, as issued against the backend to capture row images.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Point reads of whole rows by primary key.
    KeyLookup {
        table: String,
        key_columns: Vec<String>,
        keys: Vec<Vec<Value>>,
    },
    /// Reads whole rows matching a predicate, optionally taking local row locks.
    Scan {
        table: String,
        filter: Option<Expression>,
        for_update: bool,
    },
}

/// Renders the plan as the SQL a MySQL backend would receive. Parameters stay
/// as `?` placeholders; the bound values travel separately.
impl Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan { table, filter, for_update } => {
                write!(f, "SELECT * FROM {}", format_ident(table))?;
                if let Some(filter) = filter {
                    write!(f, " WHERE {}", filter)?;
                }
                if *for_update {
                    write!(f, " FOR UPDATE")?;
                }
                Ok(())
            }
            Self::KeyLookup { table, key_columns, keys } => {
                let tuple = |values: Vec<String>| {
                    if values.len() == 1 {
                        values.join("")
                    } else {
                        format!("({})", values.join(","))
                    }
                };
                write!(
                    f,
                    "SELECT * FROM {} WHERE {} IN ({})",
                    format_ident(table),
                    tuple(key_columns.iter().map(|c| format_ident(c)).collect()),
                    keys.iter()
                        .map(|key| tuple(key.iter().map(|v| v.to_string()).collect()))
                        .collect::<Vec<_>>()
                        .join(",")
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parser::ast::Operation;

    #[test]
    fn render_sql() {
        let scan = Node::Scan {
            table: "t".into(),
            filter: Some(Expression::Operation(Operation::Equal(
                Box::new(Expression::Field("id".into())),
                Box::new(Expression::Parameter(0)),
            ))),
            for_update: true,
        };
        assert_eq!(scan.to_string(), "SELECT * FROM t WHERE id = ? FOR UPDATE");

        let lookup = Node::KeyLookup {
            table: "t".into(),
            key_columns: vec!["id".into()],
            keys: vec![vec![Value::Integer(1)], vec![Value::Integer(2)]],
        };
        assert_eq!(lookup.to_string(), "SELECT * FROM t WHERE id IN (1,2)");

        let composite = Node::KeyLookup {
            table: "o".into(),
            key_columns: vec!["a".into(), "b".into()],
            keys: vec![vec![Value::Integer(1), Value::from("x")]],
        };
        assert_eq!(composite.to_string(), "SELECT * FROM o WHERE (a,b) IN ((1,'x'))");
    }
}
