//! Type descriptions for data-access methods.
//!
//! The mapping builder works against an explicit description of each
//! method: its parameter types, its return shape, and the bean shapes those
//! types refer to. This is the reflection-equivalent input named by a
//! [`QueryContract`].

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::value::Value;

/// Semantic type tag for a method parameter, return value, or bean field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TypeTag {
    Unit,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    /// Large character object; binds through the `clob` adapter.
    Text,
    Uuid,
    Date,
    Time,
    Timestamp,
    Json,
    Bean(Arc<BeanShape>),
    List(Box<TypeTag>),
    Set(Box<TypeTag>),
    Map(Box<TypeTag>, Box<TypeTag>),
}

impl TypeTag {
    /// Element type of a list or set, value type of a map.
    pub fn element(&self) -> Option<&TypeTag> {
        match self {
            TypeTag::List(e) | TypeTag::Set(e) => Some(e),
            TypeTag::Map(_, v) => Some(v),
            _ => None,
        }
    }

    /// True for the container shapes a result set can be poured into.
    pub fn is_container(&self) -> bool {
        matches!(self, TypeTag::List(_) | TypeTag::Set(_) | TypeTag::Map(_, _))
    }

    pub fn as_bean(&self) -> Option<&Arc<BeanShape>> {
        match self {
            TypeTag::Bean(shape) => Some(shape),
            _ => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Unit => write!(f, "Unit"),
            TypeTag::Bool => write!(f, "Bool"),
            TypeTag::Int => write!(f, "Int"),
            TypeTag::Float => write!(f, "Float"),
            TypeTag::Str => write!(f, "Str"),
            TypeTag::Bytes => write!(f, "Bytes"),
            TypeTag::Text => write!(f, "Text"),
            TypeTag::Uuid => write!(f, "Uuid"),
            TypeTag::Date => write!(f, "Date"),
            TypeTag::Time => write!(f, "Time"),
            TypeTag::Timestamp => write!(f, "Timestamp"),
            TypeTag::Json => write!(f, "Json"),
            TypeTag::Bean(shape) => write!(f, "{}", shape.name),
            TypeTag::List(e) => write!(f, "List<{}>", e),
            TypeTag::Set(e) => write!(f, "Set<{}>", e),
            TypeTag::Map(k, v) => write!(f, "Map<{}, {}>", k, v),
        }
    }
}

/// One named, typed field of a bean shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeTag,
}

/// Declared shape of a mapped bean: its fields and, when results are bound
/// through constructor arguments, the ordered field names that constructor
/// takes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeanShape {
    pub name: String,
    pub fields: Vec<FieldDef>,
    /// Field names taken as positional constructor arguments. Empty means
    /// default construction followed by setters.
    pub constructor: Vec<String>,
}

impl BeanShape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            constructor: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: TypeTag) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn constructor_args(mut self, fields: &[&str]) -> Self {
        self.constructor = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Look a field up by name.
    pub fn field_named(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// 0-based constructor-argument position of a field, if it is one.
    pub fn ctor_position(&self, field: &str) -> Option<usize> {
        self.constructor.iter().position(|f| f == field)
    }
}

/// A static-factory declaration for call-kind queries: the mapped result is
/// produced by this function instead of bean construction.
#[derive(Clone)]
pub struct Factory {
    pub name: String,
    pub params: Vec<TypeTag>,
    pub construct: Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>,
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Reflection-equivalent description of one data-access method.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub params: Vec<TypeTag>,
    pub returns: TypeTag,
    pub factory: Option<Factory>,
}

impl MethodInfo {
    pub fn new(name: impl Into<String>, params: Vec<TypeTag>, returns: TypeTag) -> Self {
        Self {
            name: name.into(),
            params,
            returns,
            factory: None,
        }
    }

    pub fn with_factory(mut self, factory: Factory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Human-readable signature used in validation errors.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(TypeTag::to_string).collect();
        format!("{}({}) -> {}", self.name, params.join(", "), self.returns)
    }
}

/// The statement kind a template declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Call,
}

/// One annotated data-access method: kind, template text, method shape.
#[derive(Debug, Clone)]
pub struct QueryDef {
    pub kind: QueryKind,
    pub template: String,
    pub method: MethodInfo,
}

impl QueryDef {
    pub fn new(kind: QueryKind, template: impl Into<String>, method: MethodInfo) -> Self {
        Self {
            kind,
            template: template.into(),
            method,
        }
    }
}

/// A query-definition contract: the set of annotated methods one runtime
/// query object implements.
#[derive(Debug, Clone)]
pub struct QueryContract {
    pub name: String,
    pub queries: Vec<QueryDef>,
}

impl QueryContract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queries: Vec::new(),
        }
    }

    pub fn query(mut self, def: QueryDef) -> Self {
        self.queries.push(def);
        self
    }

    pub fn find(&self, method: &str) -> Option<&QueryDef> {
        self.queries.iter().find(|q| q.method.name == method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_signature_format() {
        let m = MethodInfo::new(
            "find",
            vec![TypeTag::Str],
            TypeTag::List(Box::new(TypeTag::Int)),
        );
        assert_eq!(m.signature(), "find(Str) -> List<Int>");
    }

    #[test]
    fn test_bean_shape_lookup() {
        let shape = BeanShape::new("Emp")
            .field("id", TypeTag::Int)
            .field("name", TypeTag::Str)
            .constructor_args(&["id"]);
        assert_eq!(shape.field_named("name").map(|f| &f.ty), Some(&TypeTag::Str));
        assert_eq!(shape.ctor_position("id"), Some(0));
        assert_eq!(shape.ctor_position("name"), None);
    }

    #[test]
    fn test_element_types() {
        let t = TypeTag::Map(Box::new(TypeTag::Int), Box::new(TypeTag::Str));
        assert_eq!(t.element(), Some(&TypeTag::Str));
        assert!(t.is_container());
        assert!(!TypeTag::Int.is_container());
    }
}
