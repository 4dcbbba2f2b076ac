//! Predicate algebra
//!
//! Predicates are typed boolean expression trees over one entity's
//! attributes. Building them never touches the store; [`Predicate::compile`]
//! turns the tree into a SQL filter with bound parameters.
//!
//! ```
//! use anidex_core::catalog::{Anime, WatchStatus};
//!
//! let airing = Anime::STATUS.eq(WatchStatus::Watching) & Anime::PROGRESS.lt(0.5);
//! let filter = airing.compile();
//! assert_eq!(filter.params.len(), 2);
//! ```
//!
//! The entity is part of the predicate's type, so mixing attributes of two
//! entities does not compile:
//!
//! ```compile_fail
//! use anidex_core::catalog::{Anime, Collection};
//! use anidex_core::Timestamp;
//!
//! let mixed = Anime::TITLE.eq("X".to_string()) & Collection::CREATED_AT.lt(Timestamp::now());
//! ```
//!
//! Comparisons are two-valued: a comparison against a stored `NULL` is
//! false, so `!p` always matches exactly the rows `p` does not.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{BitAnd, BitOr, Not};

use crate::codec::Codec;
use crate::entity::Attribute;
use crate::schema::quote_ident;
use crate::value::Primitive;

/// Comparison operator of a predicate leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Const(bool),
    Compare {
        column: &'static str,
        op: CompareOp,
        value: Primitive,
    },
    In {
        column: &'static str,
        values: Vec<Primitive>,
    },
    Absent {
        column: &'static str,
        negated: bool,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// Typed boolean filter over entity `E`
pub struct Predicate<E> {
    expr: Expr,
    _entity: PhantomData<fn(&E)>,
}

impl<E> Clone for Predicate<E> {
    fn clone(&self) -> Self {
        Self::from_expr(self.expr.clone())
    }
}

impl<E> PartialEq for Predicate<E> {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl<E> fmt::Debug for Predicate<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.expr).finish()
    }
}

/// A compiled predicate: SQL boolean expression plus its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct NativeFilter {
    pub sql: String,
    pub params: Vec<Primitive>,
}

impl<E> Predicate<E> {
    fn from_expr(expr: Expr) -> Self {
        Self {
            expr,
            _entity: PhantomData,
        }
    }

    /// Matches every row
    pub fn always() -> Self {
        Self::from_expr(Expr::Const(true))
    }

    /// Matches no row
    pub fn never() -> Self {
        Self::from_expr(Expr::Const(false))
    }

    pub fn and(self, other: Predicate<E>) -> Self {
        Self::from_expr(Expr::And(Box::new(self.expr), Box::new(other.expr)))
    }

    pub fn or(self, other: Predicate<E>) -> Self {
        Self::from_expr(Expr::Or(Box::new(self.expr), Box::new(other.expr)))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::from_expr(Expr::Not(Box::new(self.expr)))
    }

    /// Compile to a SQL filter for the entity's table
    ///
    /// Deterministic: equal predicates produce identical SQL text.
    pub fn compile(&self) -> NativeFilter {
        let mut filter = NativeFilter {
            sql: String::new(),
            params: Vec::new(),
        };
        write_expr(&self.expr, &mut filter);
        filter
    }

    /// Stored columns the predicate reads
    pub(crate) fn columns(&self) -> Vec<&'static str> {
        let mut columns = Vec::new();
        collect_columns(&self.expr, &mut columns);
        columns
    }
}

fn collect_columns(expr: &Expr, out: &mut Vec<&'static str>) {
    match expr {
        Expr::Const(_) => {}
        Expr::Compare { column, .. } | Expr::In { column, .. } | Expr::Absent { column, .. } => {
            out.push(*column)
        }
        Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            collect_columns(lhs, out);
            collect_columns(rhs, out);
        }
        Expr::Not(inner) => collect_columns(inner, out),
    }
}

fn write_expr(expr: &Expr, out: &mut NativeFilter) {
    match expr {
        Expr::Const(true) => out.sql.push('1'),
        Expr::Const(false) => out.sql.push('0'),
        Expr::Compare { column, op, value } => {
            out.sql
                .push_str(&format!("IFNULL({} {} ?, 0)", quote_ident(column), op.sql()));
            out.params.push(value.clone());
        }
        Expr::In { values, .. } if values.is_empty() => out.sql.push('0'),
        Expr::In { column, values } => {
            let placeholders = vec!["?"; values.len()].join(", ");
            out.sql
                .push_str(&format!("IFNULL({} IN ({}), 0)", quote_ident(column), placeholders));
            out.params.extend(values.iter().cloned());
        }
        Expr::Absent { column, negated } => {
            let test = if *negated { "IS NOT NULL" } else { "IS NULL" };
            out.sql.push_str(&format!("{} {}", quote_ident(column), test));
        }
        Expr::And(lhs, rhs) => write_binary(lhs, "AND", rhs, out),
        Expr::Or(lhs, rhs) => write_binary(lhs, "OR", rhs, out),
        Expr::Not(inner) => {
            out.sql.push_str("(NOT ");
            write_expr(inner, out);
            out.sql.push(')');
        }
    }
}

fn write_binary(lhs: &Expr, op: &str, rhs: &Expr, out: &mut NativeFilter) {
    out.sql.push('(');
    write_expr(lhs, out);
    out.sql.push(' ');
    out.sql.push_str(op);
    out.sql.push(' ');
    write_expr(rhs, out);
    out.sql.push(')');
}

impl<E> BitAnd for Predicate<E> {
    type Output = Predicate<E>;

    fn bitand(self, rhs: Predicate<E>) -> Predicate<E> {
        self.and(rhs)
    }
}

impl<E> BitOr for Predicate<E> {
    type Output = Predicate<E>;

    fn bitor(self, rhs: Predicate<E>) -> Predicate<E> {
        self.or(rhs)
    }
}

impl<E> Not for Predicate<E> {
    type Output = Predicate<E>;

    fn not(self) -> Predicate<E> {
        Predicate::not(self)
    }
}

#[allow(clippy::should_implement_trait)]
impl<E, V: Codec> Attribute<E, V> {
    fn compare(&self, op: CompareOp, value: V) -> Predicate<E> {
        let column = self.name();
        let expr = match (value.encode(), op) {
            // absent compiles to an is-absent test, never to a sentinel literal
            (Primitive::Null, CompareOp::Eq) => Expr::Absent {
                column,
                negated: false,
            },
            (Primitive::Null, CompareOp::Ne) => Expr::Absent {
                column,
                negated: true,
            },
            (Primitive::Null, _) => Expr::Const(false),
            (value, op) => Expr::Compare { column, op, value },
        };
        Predicate::from_expr(expr)
    }

    pub fn eq(&self, value: V) -> Predicate<E> {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(&self, value: V) -> Predicate<E> {
        self.compare(CompareOp::Ne, value)
    }

    pub fn lt(&self, value: V) -> Predicate<E> {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(&self, value: V) -> Predicate<E> {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(&self, value: V) -> Predicate<E> {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(&self, value: V) -> Predicate<E> {
        self.compare(CompareOp::Ge, value)
    }

    /// Value is one of `values`; absent values in the list are ignored
    pub fn is_in(&self, values: impl IntoIterator<Item = V>) -> Predicate<E> {
        let values = values
            .into_iter()
            .map(|v| v.encode())
            .filter(|p| !p.is_null())
            .collect();
        Predicate::from_expr(Expr::In {
            column: self.name(),
            values,
        })
    }

    pub fn is_absent(&self) -> Predicate<E> {
        Predicate::from_expr(Expr::Absent {
            column: self.name(),
            negated: false,
        })
    }

    pub fn is_present(&self) -> Predicate<E> {
        Predicate::from_expr(Expr::Absent {
            column: self.name(),
            negated: true,
        })
    }
}
