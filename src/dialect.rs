//! Database dialect strategies for paging SQL rewrites.
//!
//! Paging is opt-in per concrete dialect: the base strategy fails every
//! capability with "Not supported". Concrete strategies reproduce the exact
//! textual rewriting their database expects, since correctness depends on
//! the literal SQL shape.

use crate::error::{Error, Result};

/// Strategy encoding one database's paging SQL-rewrite rules.
///
/// Flag queries describe how injected paging parameters are placed:
/// whether they precede the query's own parameters, whether the offset is
/// bound as a second parameter (versus computed by the wrapping SQL), and
/// whether the offset comes before the row limit.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn rewrite_for_paging(&self, _sql: &str, _has_offset: bool) -> Result<String> {
        Err(Error::Unsupported("Not supported"))
    }

    fn limit_parameters_before_query_parameters(&self) -> Result<bool> {
        Err(Error::Unsupported("Not supported"))
    }

    fn limit_add_offset(&self) -> Result<bool> {
        Err(Error::Unsupported("Not supported"))
    }

    fn limit_offset_first(&self) -> Result<bool> {
        Err(Error::Unsupported("Not supported"))
    }

    /// Value bound for the row-limit parameter. ROWNUM-style wrapping
    /// filters absolute row numbers, so it binds `first + max` instead.
    fn limit_value(&self, _first: usize, max: usize) -> usize {
        max
    }
}

/// Base strategy: no paging support at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDialect;

impl Dialect for StandardDialect {
    fn name(&self) -> &'static str {
        "standard"
    }
}

fn select_body(sql: &str) -> Result<&str> {
    let trimmed = sql.trim_start();
    match trimmed.get(..7) {
        Some(head) if head.eq_ignore_ascii_case("select ") => Ok(&trimmed[7..]),
        _ => Err(Error::Execution(format!(
            "paging requires a select statement, got: '{}'",
            sql.trim()
        ))),
    }
}

/// LIMIT-style dialect (HSQL family): `select top ?` without an offset,
/// `select limit <offset> <count>` with one. Paging parameters precede the
/// query's own parameters, offset first.
#[derive(Debug, Clone, Copy, Default)]
pub struct LimitDialect;

impl Dialect for LimitDialect {
    fn name(&self) -> &'static str {
        "limit"
    }

    fn rewrite_for_paging(&self, sql: &str, has_offset: bool) -> Result<String> {
        let body = select_body(sql)?;
        if has_offset {
            Ok(format!("select limit ? ? {}", body))
        } else {
            Ok(format!("select top ? {}", body))
        }
    }

    fn limit_parameters_before_query_parameters(&self) -> Result<bool> {
        Ok(true)
    }

    fn limit_add_offset(&self) -> Result<bool> {
        Ok(true)
    }

    fn limit_offset_first(&self) -> Result<bool> {
        Ok(true)
    }
}

/// ROWNUM-style dialect (Oracle family): wraps the statement in a subquery
/// filtered on `rownum`, double-wrapped when an offset is present. A
/// trailing update-lock clause stays outside the wrapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct RownumDialect;

impl RownumDialect {
    /// Split a trailing `for update` clause off, keeping its leading space.
    fn split_lock(sql: &str) -> (&str, &str) {
        let lower = sql.to_ascii_lowercase();
        match lower.rfind(" for update") {
            Some(at) => (&sql[..at], &sql[at..]),
            None => (sql, ""),
        }
    }
}

impl Dialect for RownumDialect {
    fn name(&self) -> &'static str {
        "rownum"
    }

    fn rewrite_for_paging(&self, sql: &str, has_offset: bool) -> Result<String> {
        let (body, lock) = Self::split_lock(sql.trim());
        let body = body.trim_end();
        let wrapped = if has_offset {
            format!(
                "select * from ( select qrow_.*, rownum rnum_ from ( {} ) qrow_ where rownum <= ? ) where rnum_ > ?",
                body
            )
        } else {
            format!("select * from ( {} ) where rownum <= ?", body)
        };
        Ok(format!("{}{}", wrapped, lock))
    }

    fn limit_parameters_before_query_parameters(&self) -> Result<bool> {
        Ok(false)
    }

    fn limit_add_offset(&self) -> Result<bool> {
        Ok(true)
    }

    fn limit_offset_first(&self) -> Result<bool> {
        Ok(false)
    }

    fn limit_value(&self, first: usize, max: usize) -> usize {
        first + max
    }
}

/// LIMIT/OFFSET-style dialect (Postgres and MySQL family): appends
/// ` limit ?` and, with an offset, ` offset ?`. Paging parameters trail
/// the query's own parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct LimitOffsetDialect;

impl Dialect for LimitOffsetDialect {
    fn name(&self) -> &'static str {
        "limit-offset"
    }

    fn rewrite_for_paging(&self, sql: &str, has_offset: bool) -> Result<String> {
        select_body(sql)?;
        if has_offset {
            Ok(format!("{} limit ? offset ?", sql.trim_end()))
        } else {
            Ok(format!("{} limit ?", sql.trim_end()))
        }
    }

    fn limit_parameters_before_query_parameters(&self) -> Result<bool> {
        Ok(false)
    }

    fn limit_add_offset(&self) -> Result<bool> {
        Ok(true)
    }

    fn limit_offset_first(&self) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_base_dialect_supports_nothing() {
        let d = StandardDialect;
        for err in [
            d.rewrite_for_paging("select a from b", false).unwrap_err(),
            d.limit_parameters_before_query_parameters().unwrap_err(),
            d.limit_add_offset().unwrap_err(),
            d.limit_offset_first().unwrap_err(),
        ] {
            assert_eq!(err.to_string(), "Not supported");
        }
    }

    #[test]
    fn test_limit_dialect_rewrites() {
        let d = LimitDialect;
        assert_eq!(
            d.rewrite_for_paging("select a from b", false).unwrap(),
            "select top ? a from b"
        );
        assert_eq!(
            d.rewrite_for_paging("select a from b", true).unwrap(),
            "select limit ? ? a from b"
        );
        assert!(d.limit_parameters_before_query_parameters().unwrap());
        assert!(d.limit_offset_first().unwrap());
    }

    #[test]
    fn test_rownum_dialect_wraps() {
        let d = RownumDialect;
        assert_eq!(
            d.rewrite_for_paging("select a from b", false).unwrap(),
            "select * from ( select a from b ) where rownum <= ?"
        );
        assert_eq!(
            d.rewrite_for_paging("select a from b", true).unwrap(),
            "select * from ( select qrow_.*, rownum rnum_ from ( select a from b ) qrow_ where rownum <= ? ) where rnum_ > ?"
        );
        assert_eq!(d.limit_value(10, 20), 30);
    }

    #[test]
    fn test_rownum_keeps_lock_clause_outside() {
        let d = RownumDialect;
        assert_eq!(
            d.rewrite_for_paging("select a from b for update", false)
                .unwrap(),
            "select * from ( select a from b ) where rownum <= ? for update"
        );
    }

    #[test]
    fn test_limit_offset_dialect_appends() {
        let d = LimitOffsetDialect;
        assert_eq!(
            d.rewrite_for_paging("select a from b", true).unwrap(),
            "select a from b limit ? offset ?"
        );
        assert!(!d.limit_parameters_before_query_parameters().unwrap());
    }

    #[test]
    fn test_paging_rejects_non_select() {
        let d = LimitDialect;
        assert!(d.rewrite_for_paging("update t set a = 1", false).is_err());
    }

    #[test]
    fn test_paging_rejects_short_and_multibyte_statements() {
        let d = LimitDialect;
        assert!(d.rewrite_for_paging("sel", false).is_err());
        // Byte 7 falls inside a multibyte character; must error, not panic.
        assert!(d.rewrite_for_paging("абвгдеж t", false).is_err());
    }
}
