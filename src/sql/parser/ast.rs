use super::super::schema::Table;
use super::super::types::Value;
use super::format_ident;
use crate::error::{Error, Result};

use serde_derive::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A table-level optimizer hint, e.g. `/*+ XID('gs/svc/1') */`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableHint {
    pub name: String,
    pub data: String,
}

impl TableHint {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Statements
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Begin,
    Commit,
    Rollback,
    Delete(DeleteStatement),
    Update(UpdateStatement),
    Insert(InsertStatement),
    Select(SelectStatement),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteStatement {
    pub table: String,
    pub hints: Vec<TableHint>,
    pub r#where: Option<Expression>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateStatement {
    pub table: String,
    pub hints: Vec<TableHint>,
    pub set: Vec<(String, Expression)>,
    pub r#where: Option<Expression>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsertStatement {
    pub table: String,
    pub hints: Vec<TableHint>,
    /// Target columns; None means all columns in table order.
    pub columns: Option<Vec<String>>,
    pub values: Vec<Vec<Expression>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectStatement {
    pub table: String,
    pub hints: Vec<TableHint>,
    /// Projected columns; None means `*`.
    pub columns: Option<Vec<String>>,
    pub r#where: Option<Expression>,
    pub lock: Option<SelectLock>,
}

impl SelectStatement {
    pub fn is_for_update(&self) -> bool {
        self.lock == Some(SelectLock::ForUpdate)
    }
}

/// Row locking clause of a SELECT
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectLock {
    ForUpdate,
    ForShare,
}

/// Expressions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Constant(Value),
    Field(String),
    /// A positional bind parameter, indexing the statement's bound values.
    Parameter(usize),
    Operation(Operation),
}

/// Operations (done by operators)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    // Logical operators
    And(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    Or(Box<Expression>, Box<Expression>),

    // Comparison operators
    Equal(Box<Expression>, Box<Expression>),
    GreaterThan(Box<Expression>, Box<Expression>),
    GreaterThanOrEqual(Box<Expression>, Box<Expression>),
    IsNull(Box<Expression>),
    LessThan(Box<Expression>, Box<Expression>),
    LessThanOrEqual(Box<Expression>, Box<Expression>),
    NotEqual(Box<Expression>, Box<Expression>),

    // Mathematical operators
    Add(Box<Expression>, Box<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Box<Expression>, Box<Expression>),
}

impl From<Value> for Expression {
    fn from(value: Value) -> Self {
        Expression::Constant(value)
    }
}

impl From<Operation> for Expression {
    fn from(op: Operation) -> Self {
        Expression::Operation(op)
    }
}

impl Expression {
    /// Evaluates the expression against an optional table row and the bound
    /// parameter values.
    pub fn evaluate(&self, row: Option<(&Table, &[Value])>, args: &[Value]) -> Result<Value> {
        use Value::*;
        Ok(match self {
            Self::Constant(c) => c.clone(),
            Self::Field(name) => match row {
                Some((table, values)) => values
                    .get(table.get_column_index(name)?)
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("Row has no value for {}", name)))?,
                None => return Err(Error::Value(format!("Field {} used without a row", name))),
            },
            Self::Parameter(i) => args.get(*i).cloned().ok_or_else(|| {
                Error::Value(format!("Missing bind value for parameter {}", i))
            })?,
            Self::Operation(op) => match op {
                Operation::And(lhs, rhs) => {
                    match (lhs.evaluate(row, args)?, rhs.evaluate(row, args)?) {
                        (Boolean(lhs), Boolean(rhs)) => Boolean(lhs && rhs),
                        (Boolean(false), Null) | (Null, Boolean(false)) => Boolean(false),
                        (Boolean(_), Null) | (Null, Boolean(_)) | (Null, Null) => Null,
                        (lhs, rhs) => {
                            return Err(Error::Value(format!("Can't and {} and {}", lhs, rhs)))
                        }
                    }
                }
                Operation::Or(lhs, rhs) => {
                    match (lhs.evaluate(row, args)?, rhs.evaluate(row, args)?) {
                        (Boolean(lhs), Boolean(rhs)) => Boolean(lhs || rhs),
                        (Boolean(true), Null) | (Null, Boolean(true)) => Boolean(true),
                        (Boolean(_), Null) | (Null, Boolean(_)) | (Null, Null) => Null,
                        (lhs, rhs) => {
                            return Err(Error::Value(format!("Can't or {} and {}", lhs, rhs)))
                        }
                    }
                }
                Operation::Not(expr) => match expr.evaluate(row, args)? {
                    Boolean(b) => Boolean(!b),
                    Null => Null,
                    value => return Err(Error::Value(format!("Can't negate {}", value))),
                },
                Operation::IsNull(expr) => Boolean(expr.evaluate(row, args)? == Null),
                Operation::Equal(lhs, rhs) => {
                    compare(lhs.evaluate(row, args)?, rhs.evaluate(row, args)?, |o| o.is_eq())
                }
                Operation::NotEqual(lhs, rhs) => {
                    compare(lhs.evaluate(row, args)?, rhs.evaluate(row, args)?, |o| o.is_ne())
                }
                Operation::GreaterThan(lhs, rhs) => {
                    compare(lhs.evaluate(row, args)?, rhs.evaluate(row, args)?, |o| o.is_gt())
                }
                Operation::GreaterThanOrEqual(lhs, rhs) => {
                    compare(lhs.evaluate(row, args)?, rhs.evaluate(row, args)?, |o| o.is_ge())
                }
                Operation::LessThan(lhs, rhs) => {
                    compare(lhs.evaluate(row, args)?, rhs.evaluate(row, args)?, |o| o.is_lt())
                }
                Operation::LessThanOrEqual(lhs, rhs) => {
                    compare(lhs.evaluate(row, args)?, rhs.evaluate(row, args)?, |o| o.is_le())
                }
                Operation::Add(lhs, rhs) => arithmetic(
                    lhs.evaluate(row, args)?,
                    rhs.evaluate(row, args)?,
                    "add",
                    |a, b| a.checked_add(b),
                    |a, b| a + b,
                )?,
                Operation::Subtract(lhs, rhs) => arithmetic(
                    lhs.evaluate(row, args)?,
                    rhs.evaluate(row, args)?,
                    "subtract",
                    |a, b| a.checked_sub(b),
                    |a, b| a - b,
                )?,
                Operation::Multiply(lhs, rhs) => arithmetic(
                    lhs.evaluate(row, args)?,
                    rhs.evaluate(row, args)?,
                    "multiply",
                    |a, b| a.checked_mul(b),
                    |a, b| a * b,
                )?,
            },
        })
    }
}

/// SQL comparison: anything compared with NULL yields NULL.
fn compare(lhs: Value, rhs: Value, f: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    match (&lhs, &rhs) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        _ => Value::Boolean(f(lhs.cmp(&rhs))),
    }
}

fn arithmetic(
    lhs: Value,
    rhs: Value,
    name: &str,
    int: impl Fn(i64, i64) -> Option<i64>,
    float: impl Fn(f64, f64) -> f64,
) -> Result<Value> {
    use Value::*;
    Ok(match (lhs, rhs) {
        (Integer(a), Integer(b)) => Integer(
            int(a, b).ok_or_else(|| Error::Value("Integer overflow".into()))?,
        ),
        (Integer(a), Float(b)) => Float(float(a as f64, b)),
        (Float(a), Integer(b)) => Float(float(a, b as f64)),
        (Float(a), Float(b)) => Float(float(a, b)),
        (Null, Integer(_) | Float(_) | Null) | (Integer(_) | Float(_), Null) => Null,
        (lhs, rhs) => return Err(Error::Value(format!("Can't {} {} and {}", name, lhs, rhs))),
    })
}

impl Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "{}", v),
            Self::Field(name) => write!(f, "{}", format_ident(name)),
            Self::Parameter(_) => write!(f, "?"),
            Self::Operation(op) => match op {
                Operation::And(l, r) => write!(f, "({} AND {})", l, r),
                Operation::Or(l, r) => write!(f, "({} OR {})", l, r),
                Operation::Not(e) => write!(f, "NOT {}", e),
                Operation::IsNull(e) => write!(f, "{} IS NULL", e),
                Operation::Equal(l, r) => write!(f, "{} = {}", l, r),
                Operation::NotEqual(l, r) => write!(f, "{} != {}", l, r),
                Operation::GreaterThan(l, r) => write!(f, "{} > {}", l, r),
                Operation::GreaterThanOrEqual(l, r) => write!(f, "{} >= {}", l, r),
                Operation::LessThan(l, r) => write!(f, "{} < {}", l, r),
                Operation::LessThanOrEqual(l, r) => write!(f, "{} <= {}", l, r),
                Operation::Add(l, r) => write!(f, "({} + {})", l, r),
                Operation::Subtract(l, r) => write!(f, "({} - {})", l, r),
                Operation::Multiply(l, r) => write!(f, "({} * {})", l, r),
            },
        }
    }
}
