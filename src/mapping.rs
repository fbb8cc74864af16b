//! Mapping builder: parser output + method description -> validated plan.
//!
//! The builder resolves every placeholder definition against the method's
//! declared types and the adapter registry, producing an immutable
//! [`Mapper`]. All validation happens here, once per method; invocation
//! never re-checks accessors, indexes, or adapter keys.

use std::fmt;
use std::sync::Arc;

use crate::adapter::{self, TypeAdapter};
use crate::driver::SqlPos;
use crate::error::{Error, Result};
use crate::template::{Definition, ParsedTemplate, Role};
use crate::types::{MethodInfo, QueryKind, TypeTag};

/// How a result value reaches its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    /// The row value is the result itself (scalar elements).
    Direct,
    /// Written through the named property chain.
    Setter(Vec<String>),
    /// Passed as the 0-based positional constructor argument.
    Ctor(usize),
    /// Passed as the 0-based positional static-factory argument.
    Factory(usize),
}

/// One part of a merged partial definition: its position and adapter.
#[derive(Clone)]
pub struct PartialPart {
    pub pos: SqlPos,
    pub adapter: Arc<dyn TypeAdapter>,
}

impl fmt::Debug for PartialPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialPart")
            .field("pos", &self.pos)
            .field("adapter", &self.adapter.key())
            .finish()
    }
}

/// A placeholder definition resolved to a concrete parameter binding.
#[derive(Clone)]
pub struct ParameterMapping {
    /// 0-based argument slot of the owning method parameter.
    pub arg: usize,
    /// The argument at `arg` is array/collection-typed; one execution (or
    /// batch row) is bound per element.
    pub batched: bool,
    pub path: Vec<String>,
    pub ty: TypeTag,
    pub adapter: Arc<dyn TypeAdapter>,
    /// First bound marker index; 0 when the value binds through `parts`.
    pub index: usize,
    /// Partial-definition parts, in part order. Empty for plain mappings.
    pub parts: Vec<PartialPart>,
    pub separator: String,
}

impl fmt::Debug for ParameterMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterMapping")
            .field("arg", &self.arg)
            .field("path", &self.path)
            .field("index", &self.index)
            .field("adapter", &self.adapter.key())
            .field("batched", &self.batched)
            .finish_non_exhaustive()
    }
}

/// A placeholder definition resolved to a concrete result extraction.
#[derive(Clone)]
pub struct ResultMapping {
    /// Extraction positions: 1-based result-set ordinals, or explicit
    /// column names (`positions.len() == adapter.columns()`).
    pub positions: Vec<SqlPos>,
    /// Statement marker index, used to register call out parameters.
    /// 0 for column-addressed results.
    pub out_index: usize,
    pub ty: TypeTag,
    pub adapter: Arc<dyn TypeAdapter>,
    pub write: WriteTarget,
    pub map_key: bool,
    pub parts: Vec<PartialPart>,
    pub separator: String,
}

impl fmt::Debug for ResultMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultMapping")
            .field("positions", &self.positions)
            .field("write", &self.write)
            .field("adapter", &self.adapter.key())
            .field("map_key", &self.map_key)
            .finish_non_exhaustive()
    }
}

/// The compiled, validated mapping plan for one method.
#[derive(Debug)]
pub struct Mapper {
    pub method: MethodInfo,
    pub kind: QueryKind,
    pub sql: String,
    pub parameters: Vec<ParameterMapping>,
    pub results: Vec<ResultMapping>,
    /// Highest bound statement marker index.
    pub max_index: usize,
    pub has_array_params: bool,
}

impl Mapper {
    /// The per-row element type results are assembled into.
    pub fn result_element(&self) -> &TypeTag {
        self.method.returns.element().unwrap_or(&self.method.returns)
    }
}

/// Post-build hook for adjusting a plan before it is frozen.
pub trait MapperCustomizer {
    fn customize(&self, mapper: &mut Mapper) -> Result<()>;
}

/// Build a validated mapping plan from parser output and a method
/// description.
pub fn build(
    method: MethodInfo,
    kind: QueryKind,
    parsed: ParsedTemplate,
    customizer: Option<&dyn MapperCustomizer>,
) -> Result<Mapper> {
    let sig = method.signature();

    let raw_params: Vec<RawBinding> = parsed
        .parameters
        .iter()
        .map(|def| resolve_parameter(&sig, &method, def))
        .collect::<Result<_>>()?;

    let raw_results = match kind {
        QueryKind::Select | QueryKind::Call => resolve_results(&sig, &method, &parsed.results)?,
        QueryKind::Insert | QueryKind::Update | QueryKind::Delete => {
            if !parsed.results.is_empty() {
                return Err(Error::validation(
                    &sig,
                    format!("result definitions are not allowed in {:?} statements", kind),
                ));
            }
            check_update_return(&sig, &method)?;
            Vec::new()
        }
    };

    // Spread multi-column adapters over consecutive statement positions,
    // expanding their single marker in the rewritten SQL.
    let widths: Vec<usize> = raw_params
        .iter()
        .chain(raw_results.iter())
        .filter(|r| !r.def.indexes.is_empty())
        .map(|r| (r.def.indexes[0], r.adapter.columns()))
        .collect::<std::collections::BTreeMap<_, _>>()
        .into_values()
        .collect();
    let sql = expand_markers(&parsed.sql, &widths);
    let base = marker_bases(&widths);
    let max_index: usize = widths.iter().sum();

    let parameters = assemble_parameters(&sig, raw_params, &base)?;
    let results = assemble_results(&sig, raw_results, &base)?;

    let has_array_params = parameters.iter().any(|p| p.batched);

    let mut mapper = Mapper {
        method,
        kind,
        sql,
        parameters,
        results,
        max_index,
        has_array_params,
    };
    if let Some(c) = customizer {
        c.customize(&mut mapper)?;
    }
    Ok(mapper)
}

/// A definition resolved to its type, adapter, and write target, before
/// markers are spread and partial groups are merged.
struct RawBinding {
    def: Definition,
    arg: usize,
    batched: bool,
    ty: TypeTag,
    adapter: Arc<dyn TypeAdapter>,
    write: WriteTarget,
}

fn resolve_parameter(sig: &str, method: &MethodInfo, def: &Definition) -> Result<RawBinding> {
    let Role::Parameter(n) = def.role else {
        return Err(Error::validation(sig, "internal: result in parameter list"));
    };
    if n > method.params.len() {
        return Err(Error::validation(
            sig,
            format!(
                "parameter index {} out of range (method declares {})",
                n,
                method.params.len()
            ),
        ));
    }
    let declared = &method.params[n - 1];
    let (batched, start) = match declared {
        TypeTag::List(e) | TypeTag::Set(e) => (true, (**e).clone()),
        other => (false, other.clone()),
    };
    let ty = resolve_path(sig, start, &def.path)?;
    let adapter = resolve_adapter(sig, def.adapter.as_deref(), &ty)?;
    Ok(RawBinding {
        def: def.clone(),
        arg: n - 1,
        batched,
        ty,
        adapter,
        write: WriteTarget::Direct,
    })
}

fn resolve_results(
    sig: &str,
    method: &MethodInfo,
    defs: &[Definition],
) -> Result<Vec<RawBinding>> {
    if defs.is_empty() {
        return Ok(Vec::new());
    }

    let (key_ty, element) = match &method.returns {
        TypeTag::Map(k, v) => (Some((**k).clone()), (**v).clone()),
        TypeTag::List(e) | TypeTag::Set(e) => (None, (**e).clone()),
        other => (None, other.clone()),
    };

    let keys = defs.iter().filter(|d| d.map_key).count();
    if key_ty.is_some() && keys != 1 {
        return Err(Error::validation(
            sig,
            format!("expected exactly one map key definition, found {}", keys),
        ));
    }
    if key_ty.is_none() && keys > 0 {
        return Err(Error::validation(
            sig,
            "map key definition requires a map return type",
        ));
    }
    if element == TypeTag::Unit {
        return Err(Error::validation(
            sig,
            "method with result definitions must declare a return type",
        ));
    }

    let value_defs = defs.iter().filter(|d| !d.map_key).count();
    if element.as_bean().is_none() && method.factory.is_none() && value_defs > 1 {
        return Err(Error::validation(
            sig,
            format!(
                "ambiguous result target: {} definitions for scalar element {}",
                value_defs, element
            ),
        ));
    }

    let mut out = Vec::new();
    let mut factory_pos = 0usize;
    for def in defs {
        let raw = if def.map_key {
            let ty = key_ty
                .clone()
                .ok_or_else(|| Error::validation(sig, "map key definition requires a map return type"))?;
            let adapter = resolve_adapter(sig, def.adapter.as_deref(), &ty)?;
            RawBinding {
                def: def.clone(),
                arg: 0,
                batched: false,
                ty,
                adapter,
                write: WriteTarget::Direct,
            }
        } else if let Some(factory) = &method.factory {
            if factory_pos >= factory.params.len() {
                return Err(Error::validation(
                    sig,
                    format!(
                        "factory '{}' takes {} arguments but more results are defined",
                        factory.name,
                        factory.params.len()
                    ),
                ));
            }
            let ty = factory.params[factory_pos].clone();
            let adapter = resolve_adapter(sig, def.adapter.as_deref(), &ty)?;
            let write = WriteTarget::Factory(factory_pos);
            factory_pos += 1;
            RawBinding {
                def: def.clone(),
                arg: 0,
                batched: false,
                ty,
                adapter,
                write,
            }
        } else if let Some(shape) = element.as_bean() {
            if def.path.is_empty() {
                return Err(Error::validation(
                    sig,
                    format!("result definition must name a field of '{}'", shape.name),
                ));
            }
            let ty = resolve_path(sig, element.clone(), &def.path)?;
            let adapter = resolve_adapter(sig, def.adapter.as_deref(), &ty)?;
            let write = match shape.ctor_position(&def.path[0]) {
                Some(pos) if def.path.len() == 1 => WriteTarget::Ctor(pos),
                _ => WriteTarget::Setter(def.path.clone()),
            };
            RawBinding {
                def: def.clone(),
                arg: 0,
                batched: false,
                ty,
                adapter,
                write,
            }
        } else {
            // Scalar element: the row value is the result itself.
            if !def.path.is_empty() {
                return Err(Error::validation(
                    sig,
                    format!(
                        "field path '{}' has no target on scalar element {}",
                        def.path.join("."),
                        element
                    ),
                ));
            }
            let adapter = resolve_adapter(sig, def.adapter.as_deref(), &element)?;
            RawBinding {
                def: def.clone(),
                arg: 0,
                batched: false,
                ty: element.clone(),
                adapter,
                write: WriteTarget::Direct,
            }
        };
        out.push(raw);
    }
    Ok(out)
}

fn check_update_return(sig: &str, method: &MethodInfo) -> Result<()> {
    match &method.returns {
        TypeTag::Unit | TypeTag::Int => Ok(()),
        TypeTag::List(e) if **e == TypeTag::Int => Ok(()),
        other => Err(Error::validation(
            sig,
            format!("unsupported return type {} for an update method", other),
        )),
    }
}

/// Walk a property chain getter-wise through bean shapes.
fn resolve_path(sig: &str, start: TypeTag, path: &[String]) -> Result<TypeTag> {
    let mut cur = start;
    for seg in path {
        let shape = match cur.as_bean() {
            Some(shape) => Arc::clone(shape),
            None => {
                return Err(Error::validation(
                    sig,
                    format!("cannot resolve field '{}' through non-bean type {}", seg, cur),
                ));
            }
        };
        let field = shape.field_named(seg).ok_or_else(|| {
            Error::validation(
                sig,
                format!("no accessor for field '{}' on '{}'", seg, shape.name),
            )
        })?;
        cur = field.ty.clone();
    }
    Ok(cur)
}

fn resolve_adapter(
    sig: &str,
    explicit: Option<&str>,
    ty: &TypeTag,
) -> Result<Arc<dyn TypeAdapter>> {
    let key = match explicit {
        Some(key) => key,
        None => adapter::default_key(ty).ok_or_else(|| {
            Error::validation(sig, format!("no adapter can be inferred for type {}", ty))
        })?,
    };
    adapter::lookup(key)
        .ok_or_else(|| Error::validation(sig, format!("unknown adapter '{}'", key)))
}

/// First bound position of each marker once widths are applied:
/// `base[k]` is the 1-based statement index of marker k+1.
fn marker_bases(widths: &[usize]) -> Vec<usize> {
    let mut base = Vec::with_capacity(widths.len());
    let mut next = 1usize;
    for w in widths {
        base.push(next);
        next += w;
    }
    base
}

/// Expand the k-th `?` marker into `widths[k]` comma-joined markers.
fn expand_markers(sql: &str, widths: &[usize]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut seen = 0usize;
    for c in sql.chars() {
        if c == '?' {
            let w = widths.get(seen).copied().unwrap_or(1);
            out.push_str(&vec!["?"; w].join(", "));
            seen += 1;
        } else {
            out.push(c);
        }
    }
    out
}

fn assemble_parameters(
    sig: &str,
    raws: Vec<RawBinding>,
    base: &[usize],
) -> Result<Vec<ParameterMapping>> {
    let mut out: Vec<ParameterMapping> = Vec::new();
    let mut i = 0usize;
    while i < raws.len() {
        let raw = &raws[i];
        match &raw.def.partial {
            None => {
                out.push(ParameterMapping {
                    arg: raw.arg,
                    batched: raw.batched,
                    path: raw.def.path.clone(),
                    ty: raw.ty.clone(),
                    adapter: Arc::clone(&raw.adapter),
                    index: marker_base(base, &raw.def),
                    parts: Vec::new(),
                    separator: String::new(),
                });
                i += 1;
            }
            Some(first) => {
                let group = first.group.clone();
                let mut members = Vec::new();
                while i < raws.len()
                    && raws[i]
                        .def
                        .partial
                        .as_ref()
                        .is_some_and(|p| p.group == group)
                {
                    members.push(&raws[i]);
                    i += 1;
                }
                let lead = members[0];
                for m in &members {
                    if m.arg != lead.arg || m.def.path != lead.def.path {
                        return Err(Error::validation(
                            sig,
                            format!(
                                "partial definition group '{}' parts must target the same value",
                                group
                            ),
                        ));
                    }
                }
                let parts = merge_partial(sig, &group, &members, base)?;
                let separator = lead.def.partial.as_ref().map(|p| p.separator.clone());
                out.push(ParameterMapping {
                    arg: lead.arg,
                    batched: lead.batched,
                    path: lead.def.path.clone(),
                    ty: lead.ty.clone(),
                    adapter: Arc::clone(&lead.adapter),
                    index: 0,
                    parts,
                    separator: separator.unwrap_or_default(),
                });
            }
        }
    }
    Ok(out)
}

fn assemble_results(
    sig: &str,
    raws: Vec<RawBinding>,
    base: &[usize],
) -> Result<Vec<ResultMapping>> {
    let mut out: Vec<ResultMapping> = Vec::new();
    // 1-based result-set ordinal, advanced per consumed result column.
    let mut ordinal = 1usize;
    let mut i = 0usize;
    while i < raws.len() {
        let raw = &raws[i];
        match &raw.def.partial {
            None => {
                let width = raw.adapter.columns();
                let (positions, out_index) = if raw.def.column_addressed() {
                    if raw.def.columns.len() != width {
                        return Err(Error::validation(
                            sig,
                            format!(
                                "adapter '{}' consumes {} columns but {} named",
                                raw.adapter.key(),
                                width,
                                raw.def.columns.len()
                            ),
                        ));
                    }
                    let cols = raw
                        .def
                        .columns
                        .iter()
                        .cloned()
                        .map(SqlPos::Column)
                        .collect();
                    (cols, 0)
                } else {
                    let positions = (0..width).map(|o| SqlPos::Index(ordinal + o)).collect();
                    ordinal += width;
                    (positions, marker_base(base, &raw.def))
                };
                out.push(ResultMapping {
                    positions,
                    out_index,
                    ty: raw.ty.clone(),
                    adapter: Arc::clone(&raw.adapter),
                    write: raw.write.clone(),
                    map_key: raw.def.map_key,
                    parts: Vec::new(),
                    separator: String::new(),
                });
                i += 1;
            }
            Some(first) => {
                let group = first.group.clone();
                let mut members = Vec::new();
                while i < raws.len()
                    && raws[i]
                        .def
                        .partial
                        .as_ref()
                        .is_some_and(|p| p.group == group)
                {
                    members.push(&raws[i]);
                    i += 1;
                }
                let lead = members[0];
                let mut parts = merge_partial(sig, &group, &members, base)?;
                // Partial result parts extract at ordinals or named columns,
                // assigned in source order whatever the part numbering.
                for member in &members {
                    let Some(p) = member.def.partial.as_ref() else {
                        continue;
                    };
                    parts[p.part - 1].pos = if member.def.column_addressed() {
                        SqlPos::Column(member.def.columns[0].clone())
                    } else {
                        let pos = SqlPos::Index(ordinal);
                        ordinal += 1;
                        pos
                    };
                }
                let separator = lead.def.partial.as_ref().map(|p| p.separator.clone());
                out.push(ResultMapping {
                    positions: Vec::new(),
                    out_index: 0,
                    ty: lead.ty.clone(),
                    adapter: Arc::clone(&lead.adapter),
                    write: lead.write.clone(),
                    map_key: lead.def.map_key,
                    parts,
                    separator: separator.unwrap_or_default(),
                });
            }
        }
    }
    Ok(out)
}

fn marker_base(base: &[usize], def: &Definition) -> usize {
    def.indexes
        .first()
        .and_then(|k| base.get(k - 1))
        .copied()
        .unwrap_or(0)
}

/// Validate one partial group and produce its ordered parts.
fn merge_partial(
    sig: &str,
    group: &str,
    members: &[&RawBinding],
    base: &[usize],
) -> Result<Vec<PartialPart>> {
    let mut seen: Vec<(usize, &RawBinding)> = Vec::new();
    let mut separator: Option<&str> = None;
    for m in members {
        let p = m
            .def
            .partial
            .as_ref()
            .ok_or_else(|| Error::validation(sig, "internal: non-partial in group"))?;
        match separator {
            None => separator = Some(&p.separator),
            Some(sep) if sep != p.separator => {
                return Err(Error::validation(
                    sig,
                    format!("partial definition group '{}' must share one separator", group),
                ));
            }
            _ => {}
        }
        seen.push((p.part, m));
    }
    seen.sort_by_key(|(part, _)| *part);
    for (expect, (part, _)) in (1usize..).zip(seen.iter()) {
        if *part != expect {
            return Err(Error::validation(
                sig,
                format!(
                    "partial definition group '{}' parts must be numbered contiguously from 1",
                    group
                ),
            ));
        }
    }
    Ok(seen
        .into_iter()
        .map(|(_, m)| PartialPart {
            pos: SqlPos::Index(marker_base(base, &m.def)),
            adapter: Arc::clone(&m.adapter),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template;
    use crate::types::BeanShape;
    use pretty_assertions::assert_eq;

    fn build_for(
        template_text: &str,
        kind: QueryKind,
        method: MethodInfo,
    ) -> Result<Mapper> {
        let parsed = template::parse(template_text, false)?;
        build(method, kind, parsed, None)
    }

    fn person_shape() -> Arc<BeanShape> {
        Arc::new(
            BeanShape::new("Person")
                .field("id", TypeTag::Int)
                .field("name", TypeTag::Str)
                .field("salary", TypeTag::Float),
        )
    }

    #[test]
    fn test_scalar_select_plan() {
        let m = MethodInfo::new(
            "find",
            vec![TypeTag::Str],
            TypeTag::List(Box::new(TypeTag::Int)),
        );
        let mapper = build_for(
            "select id {%%} from person where name = {%1}",
            QueryKind::Select,
            m,
        )
        .unwrap();
        assert_eq!(mapper.sql, "select id ? from person where name = ?");
        assert_eq!(mapper.parameters.len(), 1);
        assert_eq!(mapper.parameters[0].arg, 0);
        assert_eq!(mapper.parameters[0].index, 2);
        assert_eq!(mapper.parameters[0].adapter.key(), "string");
        assert_eq!(mapper.results.len(), 1);
        assert_eq!(mapper.results[0].positions, vec![SqlPos::Index(1)]);
        assert_eq!(mapper.results[0].write, WriteTarget::Direct);
        assert_eq!(mapper.max_index, 2);
        assert!(!mapper.has_array_params);
    }

    #[test]
    fn test_auto_adapters_in_declaration_order() {
        let m = MethodInfo::new(
            "add",
            vec![TypeTag::Int, TypeTag::Str, TypeTag::Float],
            TypeTag::Unit,
        );
        let mapper = build_for(
            "insert into person values ({%1}, {%2}, {%3})",
            QueryKind::Insert,
            m,
        )
        .unwrap();
        let keys: Vec<&str> = mapper.parameters.iter().map(|p| p.adapter.key()).collect();
        assert_eq!(keys, vec!["int", "string", "float"]);
        let indexes: Vec<usize> = mapper.parameters.iter().map(|p| p.index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    #[test]
    fn test_parameter_index_out_of_range() {
        let m = MethodInfo::new("find", vec![TypeTag::Str], TypeTag::Unit);
        let err = build_for("delete from t where a = {%2}", QueryKind::Delete, m).unwrap_err();
        match err {
            Error::Validation { method, detail } => {
                assert_eq!(method, "find(Str) -> Unit");
                assert!(detail.contains("parameter index 2 out of range"), "{detail}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_field_path_resolution() {
        let m = MethodInfo::new(
            "rename",
            vec![TypeTag::Bean(person_shape())],
            TypeTag::Unit,
        );
        let mapper = build_for(
            "update person set name = {%1name} where id = {%1id}",
            QueryKind::Update,
            m,
        )
        .unwrap();
        assert_eq!(mapper.parameters[0].path, vec!["name"]);
        assert_eq!(mapper.parameters[0].ty, TypeTag::Str);
        assert_eq!(mapper.parameters[1].ty, TypeTag::Int);
    }

    #[test]
    fn test_missing_accessor() {
        let m = MethodInfo::new(
            "rename",
            vec![TypeTag::Bean(person_shape())],
            TypeTag::Unit,
        );
        let err = build_for(
            "update person set nick = {%1nick}",
            QueryKind::Update,
            m,
        )
        .unwrap_err();
        match err {
            Error::Validation { detail, .. } => {
                assert_eq!(detail, "no accessor for field 'nick' on 'Person'");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_adapter_key() {
        let m = MethodInfo::new("find", vec![TypeTag::Str], TypeTag::Unit);
        let err = build_for(
            "delete from t where a = {mystery%1}",
            QueryKind::Delete,
            m,
        )
        .unwrap_err();
        match err {
            Error::Validation { detail, .. } => assert_eq!(detail, "unknown adapter 'mystery'"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bean_results_use_ctor_then_setter() {
        let shape = Arc::new(
            BeanShape::new("Emp")
                .field("id", TypeTag::Int)
                .field("name", TypeTag::Str)
                .constructor_args(&["id"]),
        );
        let m = MethodInfo::new(
            "all",
            vec![],
            TypeTag::List(Box::new(TypeTag::Bean(shape))),
        );
        let mapper = build_for(
            "select id, name from emp {%%id:id, %%name:name}",
            QueryKind::Select,
            m,
        );
        // Multi-definition blocks need a map key; use separate blocks.
        assert!(mapper.is_err());

        let shape = Arc::new(
            BeanShape::new("Emp")
                .field("id", TypeTag::Int)
                .field("name", TypeTag::Str)
                .constructor_args(&["id"]),
        );
        let m = MethodInfo::new(
            "all",
            vec![],
            TypeTag::List(Box::new(TypeTag::Bean(shape))),
        );
        let mapper = build_for(
            "select id {%%id}, name {%%name} from emp",
            QueryKind::Select,
            m,
        )
        .unwrap();
        assert_eq!(mapper.results[0].write, WriteTarget::Ctor(0));
        assert_eq!(mapper.results[1].write, WriteTarget::Setter(vec!["name".into()]));
        assert_eq!(mapper.results[0].positions, vec![SqlPos::Index(1)]);
        assert_eq!(mapper.results[1].positions, vec![SqlPos::Index(2)]);
    }

    #[test]
    fn test_map_return_requires_one_key() {
        let map_ty = TypeTag::Map(Box::new(TypeTag::Int), Box::new(TypeTag::Str));
        let m = MethodInfo::new("index", vec![], map_ty.clone());
        let err = build_for("select id {%%}, name {%%} from emp", QueryKind::Select, m)
            .unwrap_err();
        match err {
            Error::Validation { detail, .. } => {
                assert!(detail.contains("exactly one map key definition"), "{detail}");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let m = MethodInfo::new("index", vec![], map_ty);
        let mapper = build_for(
            "select id {%%*}, name {%%} from emp",
            QueryKind::Select,
            m,
        )
        .unwrap();
        assert!(mapper.results[0].map_key);
        assert_eq!(mapper.results[0].adapter.key(), "int");
        assert_eq!(mapper.results[1].adapter.key(), "string");
    }

    #[test]
    fn test_map_key_without_map_return() {
        let m = MethodInfo::new("index", vec![], TypeTag::List(Box::new(TypeTag::Int)));
        let err = build_for("select id {%%*} from emp", QueryKind::Select, m).unwrap_err();
        match err {
            Error::Validation { detail, .. } => {
                assert_eq!(detail, "map key definition requires a map return type");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_array_parameter_sets_batch_flag() {
        let m = MethodInfo::new(
            "remove",
            vec![TypeTag::List(Box::new(TypeTag::Int))],
            TypeTag::List(Box::new(TypeTag::Int)),
        );
        let mapper = build_for("delete from t where id = {%1}", QueryKind::Delete, m).unwrap();
        assert!(mapper.has_array_params);
        assert!(mapper.parameters[0].batched);
        assert_eq!(mapper.parameters[0].ty, TypeTag::Int);
    }

    #[test]
    fn test_partial_group_merges_into_one_mapping() {
        let m = MethodInfo::new("byTel", vec![TypeTag::Str], TypeTag::Unit);
        let mapper = build_for(
            "delete from t where area = {%1(tel,1,-)} and local = {%1(tel,2,-)}",
            QueryKind::Delete,
            m,
        )
        .unwrap();
        assert_eq!(mapper.parameters.len(), 1);
        let pm = &mapper.parameters[0];
        assert_eq!(pm.parts.len(), 2);
        assert_eq!(pm.separator, "-");
        assert_eq!(pm.parts[0].pos, SqlPos::Index(1));
        assert_eq!(pm.parts[1].pos, SqlPos::Index(2));
    }

    #[test]
    fn test_partial_group_separator_mismatch() {
        let m = MethodInfo::new("byTel", vec![TypeTag::Str], TypeTag::Unit);
        let err = build_for(
            "delete from t where a = {%1(tel,1,-)} and b = {%1(tel,2,/)}",
            QueryKind::Delete,
            m,
        )
        .unwrap_err();
        match err {
            Error::Validation { detail, .. } => {
                assert!(detail.contains("must share one separator"), "{detail}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_partial_group_hole_in_numbering() {
        let m = MethodInfo::new("byTel", vec![TypeTag::Str], TypeTag::Unit);
        let err = build_for(
            "delete from t where a = {%1(tel,1,-)} and b = {%1(tel,3,-)}",
            QueryKind::Delete,
            m,
        )
        .unwrap_err();
        match err {
            Error::Validation { detail, .. } => {
                assert!(detail.contains("numbered contiguously"), "{detail}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_multi_column_adapter_expands_markers() {
        let m = MethodInfo::new("stamp", vec![TypeTag::Timestamp], TypeTag::Unit);
        let mapper = build_for(
            "insert into log values ({datetime2%1}, {%1})",
            QueryKind::Insert,
            m,
        )
        .unwrap();
        assert_eq!(mapper.sql, "insert into log values (?, ?, ?)");
        assert_eq!(mapper.parameters[0].index, 1);
        assert_eq!(mapper.parameters[1].index, 3);
        assert_eq!(mapper.max_index, 3);
    }

    #[test]
    fn test_update_return_type_checked() {
        let m = MethodInfo::new("bad", vec![TypeTag::Int], TypeTag::Str);
        let err = build_for("delete from t where id = {%1}", QueryKind::Delete, m).unwrap_err();
        match err {
            Error::Validation { detail, .. } => {
                assert!(detail.contains("unsupported return type"), "{detail}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
