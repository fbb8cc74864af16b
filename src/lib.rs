//! # querybind — annotated SQL templates, compiled and cached
//!
//! querybind turns SQL method templates with `{...}` placeholder blocks
//! into validated, reusable procedures. A template is written once next to
//! the method it implements; compilation checks every placeholder against
//! the method's declared types, and invocation binds arguments, executes,
//! and pours the result set into the declared return shape.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use querybind::prelude::*;
//!
//! let contract = QueryContract::new("PersonQueries").query(QueryDef::new(
//!     QueryKind::Select,
//!     "select id {%%} from person where name = {%1}",
//!     MethodInfo::new("idsByName", vec![TypeTag::Str], TypeTag::List(Box::new(TypeTag::Int))),
//! ));
//!
//! let mut people = QueryObject::create(conn, contract, Arc::new(LimitOffsetDialect))?;
//! let ids = people.invoke("idsByName", &[Value::from("ada")])?;
//! ```
//!
//! ## Placeholder syntax
//!
//! | Form          | Name        | Function                              |
//! |---------------|-------------|---------------------------------------|
//! | `{%N}`        | Parameter   | Binds method parameter N              |
//! | `{%%}`        | Result      | Maps the next result column           |
//! | `{%%*}`       | Map key     | Keys a map return value               |
//! | `{clob%N}`    | Adapter     | Overrides the inferred type adapter   |
//! | `{%N addr.zip}` | Field path | Reads/writes through bean properties |
//! | `{%N(g,p,s)}` | Partial     | Part p of a value split on s          |
//! | `{%%f:col}`   | Column      | Extracts by column name, no marker    |

pub mod adapter;
pub mod dialect;
pub mod driver;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod template;
pub mod types;
pub mod value;

pub mod prelude {
    pub use crate::adapter::TypeAdapter;
    pub use crate::dialect::{
        Dialect, LimitDialect, LimitOffsetDialect, RownumDialect, StandardDialect,
    };
    pub use crate::driver::{Connection, RowData, SqlPos, Statement};
    pub use crate::engine::{CompiledProcedure, QueryObject, Window};
    pub use crate::error::{Error, Result};
    pub use crate::types::{
        BeanShape, Factory, MethodInfo, QueryContract, QueryDef, QueryKind, TypeTag,
    };
    pub use crate::value::{Bean, Value};
}

/// Parse a method template into its SQL text and placeholder definitions.
///
/// # Example
///
/// ```
/// use querybind::parse;
///
/// let t = parse("select id {%%} from person where name = {%1}").unwrap();
/// assert_eq!(t.sql, "select id ? from person where name = ?");
/// ```
pub fn parse(template: &str) -> error::Result<template::ParsedTemplate> {
    template::parse(template, false)
}
