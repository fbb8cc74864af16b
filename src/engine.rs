//! Compiled procedures, the process-wide compile cache, and the runtime
//! query object.
//!
//! A [`CompiledProcedure`] is the frozen product of parsing and mapping one
//! annotated method for one dialect. Compilation happens once per
//! dialect/method pair; invocations only bind, execute, and assemble.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tracing::{debug, trace};

use crate::dialect::Dialect;
use crate::driver::{Connection, RowData, SqlPos, Statement};
use crate::error::{Error, Result};
use crate::mapping::{self, Mapper, MapperCustomizer, ParameterMapping, ResultMapping, WriteTarget};
use crate::template;
use crate::types::{QueryContract, QueryDef, QueryKind, TypeTag};
use crate::value::{Bean, Value};

/// Paging window for one select invocation. `max == 0` means no paging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    /// Rows skipped before the first returned row.
    pub first: usize,
    /// Maximum number of rows returned; 0 disables paging.
    pub max: usize,
}

impl Window {
    fn is_active(&self) -> bool {
        self.max > 0
    }
}

/// Per-invocation execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct Invocation {
    /// Fetch-size hint passed to the statement; 0 leaves the driver default.
    pub fetch_size: usize,
    /// Batched rows per round trip; 0 sends the whole batch at once.
    pub batch_size: usize,
    pub window: Window,
}

/// One method's template compiled against one dialect.
pub struct CompiledProcedure {
    mapper: Mapper,
    dialect: Arc<dyn Dialect>,
}

impl std::fmt::Debug for CompiledProcedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledProcedure")
            .field("method", &self.mapper.method.signature())
            .field("dialect", &self.dialect.name())
            .field("sql", &self.mapper.sql)
            .finish()
    }
}

impl CompiledProcedure {
    pub fn compile(def: &QueryDef, dialect: Arc<dyn Dialect>) -> Result<Self> {
        Self::compile_with(def, dialect, None)
    }

    /// Compile with a post-build hook on the mapping plan. Customized
    /// procedures are never cached.
    pub fn compile_with(
        def: &QueryDef,
        dialect: Arc<dyn Dialect>,
        customizer: Option<&dyn MapperCustomizer>,
    ) -> Result<Self> {
        let single = def.kind != QueryKind::Select;
        let parsed = template::parse(&def.template, single)?;
        let mapper = mapping::build(def.method.clone(), def.kind, parsed, customizer)?;
        let sig = mapper.method.signature();
        if mapper.has_array_params
            && !matches!(
                def.kind,
                QueryKind::Insert | QueryKind::Update | QueryKind::Delete
            )
        {
            return Err(Error::validation(
                &sig,
                "array parameters are only supported in insert, update, and delete statements",
            ));
        }
        if def.kind == QueryKind::Call {
            for rm in &mapper.results {
                if rm.out_index == 0 {
                    return Err(Error::validation(
                        &sig,
                        "call results must be plain positional definitions",
                    ));
                }
            }
        }
        debug!(method = %sig, dialect = dialect.name(), sql = %mapper.sql, "compiled procedure");
        Ok(Self { mapper, dialect })
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub fn sql(&self) -> &str {
        &self.mapper.sql
    }

    /// Execute against one live connection and assemble the declared
    /// return value.
    pub fn invoke(
        &self,
        conn: &dyn Connection,
        args: &[Value],
        opts: &Invocation,
    ) -> Result<Value> {
        let expected = self.mapper.method.params.len();
        if args.len() != expected {
            return Err(Error::Execution(format!(
                "{} expects {} arguments, got {}",
                self.mapper.method.signature(),
                expected,
                args.len()
            )));
        }
        match self.mapper.kind {
            QueryKind::Select => self.invoke_select(conn, args, opts),
            QueryKind::Insert | QueryKind::Update | QueryKind::Delete => {
                self.invoke_update(conn, args, opts)
            }
            QueryKind::Call => self.invoke_call(conn, args),
        }
    }

    fn invoke_select(
        &self,
        conn: &dyn Connection,
        args: &[Value],
        opts: &Invocation,
    ) -> Result<Value> {
        let mut sql = self.mapper.sql.clone();
        let mut leading: Vec<Value> = Vec::new();
        let mut trailing: Vec<Value> = Vec::new();

        if opts.window.is_active() {
            let window = opts.window;
            let has_offset = window.first > 0;
            sql = self.dialect.rewrite_for_paging(&sql, has_offset)?;
            let limit = Value::Int(self.dialect.limit_value(window.first, window.max) as i64);
            let mut paging = vec![limit];
            if has_offset && self.dialect.limit_add_offset()? {
                let offset = Value::Int(window.first as i64);
                if self.dialect.limit_offset_first()? {
                    paging.insert(0, offset);
                } else {
                    paging.push(offset);
                }
            }
            if self.dialect.limit_parameters_before_query_parameters()? {
                leading = paging;
            } else {
                trailing = paging;
            }
        }

        trace!(sql = %sql, "executing select");
        let mut stmt = conn.prepare(&sql)?;
        if opts.fetch_size > 0 {
            stmt.set_fetch_size(opts.fetch_size)?;
        }
        let shift = leading.len();
        for (i, v) in leading.iter().enumerate() {
            stmt.bind(i + 1, v)?;
        }
        for pm in &self.mapper.parameters {
            let value = parameter_value(&args[pm.arg], &pm.path)?;
            bind_parameter(stmt.as_mut(), pm, &value, shift)?;
        }
        for (i, v) in trailing.iter().enumerate() {
            stmt.bind(shift + self.mapper.max_index + i + 1, v)?;
        }
        let rows = stmt.query()?;
        self.assemble(&rows)
    }

    fn invoke_update(
        &self,
        conn: &dyn Connection,
        args: &[Value],
        opts: &Invocation,
    ) -> Result<Value> {
        trace!(sql = %self.mapper.sql, "executing update");
        let mut stmt = conn.prepare(&self.mapper.sql)?;
        let counts = if self.mapper.has_array_params {
            self.run_batched(stmt.as_mut(), args, opts)?
        } else {
            for pm in &self.mapper.parameters {
                let value = parameter_value(&args[pm.arg], &pm.path)?;
                bind_parameter(stmt.as_mut(), pm, &value, 0)?;
            }
            vec![stmt.execute_update()?]
        };
        Ok(update_result(&self.mapper.method.returns, counts))
    }

    fn run_batched(
        &self,
        stmt: &mut dyn Statement,
        args: &[Value],
        opts: &Invocation,
    ) -> Result<Vec<u64>> {
        let mut cardinality: Option<usize> = None;
        for pm in self.mapper.parameters.iter().filter(|p| p.batched) {
            let seq = args[pm.arg].as_seq().ok_or_else(|| {
                Error::Execution(format!(
                    "argument {} of {} is not a sequence",
                    pm.arg + 1,
                    self.mapper.method.signature()
                ))
            })?;
            match cardinality {
                None => cardinality = Some(seq.len()),
                Some(n) if n != seq.len() => {
                    return Err(Error::Execution(format!(
                        "batch parameter cardinality mismatch: {} vs {}",
                        n,
                        seq.len()
                    )));
                }
                Some(_) => {}
            }
        }
        let rows = cardinality.unwrap_or(0);

        let mut counts = Vec::with_capacity(rows);
        let mut pending = 0usize;
        for r in 0..rows {
            for pm in &self.mapper.parameters {
                let source = if pm.batched {
                    match args[pm.arg].as_seq() {
                        Some(seq) => &seq[r],
                        None => &Value::Null,
                    }
                } else {
                    &args[pm.arg]
                };
                let value = parameter_value(source, &pm.path)?;
                bind_parameter(stmt, pm, &value, 0)?;
            }
            stmt.add_batch()?;
            pending += 1;
            if opts.batch_size > 0 && pending >= opts.batch_size {
                counts.extend(stmt.execute_batch()?);
                pending = 0;
            }
        }
        if pending > 0 {
            counts.extend(stmt.execute_batch()?);
        }
        Ok(counts)
    }

    fn invoke_call(&self, conn: &dyn Connection, args: &[Value]) -> Result<Value> {
        trace!(sql = %self.mapper.sql, "executing call");
        let mut stmt = conn.prepare_call(&self.mapper.sql)?;
        for pm in &self.mapper.parameters {
            let value = parameter_value(&args[pm.arg], &pm.path)?;
            bind_parameter(stmt.as_mut(), pm, &value, 0)?;
        }
        for rm in &self.mapper.results {
            rm.adapter.register_out(stmt.as_mut(), rm.out_index)?;
        }
        stmt.execute()?;
        if self.mapper.results.is_empty() {
            return Ok(Value::Null);
        }

        // Rebuild the out parameters as a single synthetic row so result
        // assembly is shared with selects.
        let width = self
            .mapper
            .results
            .iter()
            .flat_map(|rm| &rm.positions)
            .filter_map(|p| match p {
                SqlPos::Index(i) => Some(*i),
                SqlPos::Column(_) => None,
            })
            .max()
            .unwrap_or(0);
        let mut values = vec![Value::Null; width];
        for rm in &self.mapper.results {
            for (k, pos) in rm.positions.iter().enumerate() {
                if let SqlPos::Index(ordinal) = pos {
                    values[ordinal - 1] = stmt.out_value(rm.out_index + k)?;
                }
            }
        }
        self.assemble(&[RowData::new(Vec::new(), values)])
    }

    /// Pour fetched rows into the declared return shape.
    fn assemble(&self, rows: &[RowData]) -> Result<Value> {
        match &self.mapper.method.returns {
            TypeTag::List(_) => {
                let items = rows
                    .iter()
                    .map(|r| self.build_element(r))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Seq(items))
            }
            TypeTag::Set(_) => {
                let mut items: Vec<Value> = Vec::new();
                for row in rows {
                    let item = self.build_element(row)?;
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                Ok(Value::Seq(items))
            }
            TypeTag::Map(_, _) => {
                let key_mapping = self
                    .mapper
                    .results
                    .iter()
                    .find(|rm| rm.map_key)
                    .ok_or_else(|| Error::Execution("map return without a key mapping".into()))?;
                let mut map = HashMap::new();
                for row in rows {
                    let key = extract_result(key_mapping, row)?;
                    let item = self.build_element(row)?;
                    map.insert(key, item);
                }
                Ok(Value::Map(map))
            }
            _ => match rows.first() {
                Some(row) => self.build_element(row),
                None => Ok(Value::Null),
            },
        }
    }

    /// Build one element of the return container from one row.
    fn build_element(&self, row: &RowData) -> Result<Value> {
        if let Some(factory) = &self.mapper.method.factory {
            let mut fargs = vec![Value::Null; factory.params.len()];
            for rm in self.mapper.results.iter().filter(|rm| !rm.map_key) {
                if let WriteTarget::Factory(pos) = rm.write {
                    fargs[pos] = extract_result(rm, row)?;
                }
            }
            return (factory.construct)(&fargs);
        }

        let element = self.mapper.result_element().clone();
        if let Some(shape) = element.as_bean() {
            let mut ctor_args = vec![Value::Null; shape.constructor.len()];
            let mut setters: Vec<(&[String], Value)> = Vec::new();
            for rm in self.mapper.results.iter().filter(|rm| !rm.map_key) {
                let value = extract_result(rm, row)?;
                match &rm.write {
                    WriteTarget::Ctor(pos) => ctor_args[*pos] = value,
                    WriteTarget::Setter(path) => setters.push((path, value)),
                    WriteTarget::Direct | WriteTarget::Factory(_) => {
                        return Err(Error::Execution(format!(
                            "unexpected write target for bean '{}'",
                            shape.name
                        )));
                    }
                }
            }
            let mut bean = Bean::new(Arc::clone(shape));
            for (field, value) in shape.constructor.iter().zip(ctor_args) {
                bean.set(field, value)?;
            }
            for (path, value) in setters {
                set_path(&mut bean, path, value)?;
            }
            return Ok(Value::Bean(bean));
        }

        // Scalar element: the single non-key mapping is the value itself.
        match self.mapper.results.iter().find(|rm| !rm.map_key) {
            Some(rm) => extract_result(rm, row),
            None => Ok(Value::Null),
        }
    }
}

/// Resolve a method argument through its property chain. Nulls propagate.
fn parameter_value(source: &Value, path: &[String]) -> Result<Value> {
    let mut cur = source;
    for seg in path {
        cur = match cur {
            Value::Null => return Ok(Value::Null),
            Value::Bean(bean) => bean.get(seg).unwrap_or(&Value::Null),
            other => {
                return Err(Error::Execution(format!(
                    "cannot read field '{}' from {} value",
                    seg,
                    other.type_name()
                )));
            }
        };
    }
    Ok(cur.clone())
}

/// Bind one mapped parameter, splitting partial values over their parts.
fn bind_parameter(
    stmt: &mut dyn Statement,
    pm: &ParameterMapping,
    value: &Value,
    shift: usize,
) -> Result<()> {
    if pm.parts.is_empty() {
        return pm.adapter.bind(stmt, pm.index + shift, value);
    }
    let pieces = split_value(value, &pm.separator, pm.parts.len());
    for (part, piece) in pm.parts.iter().zip(pieces) {
        if let SqlPos::Index(i) = &part.pos {
            part.adapter.bind(stmt, i + shift, &piece)?;
        }
    }
    Ok(())
}

/// Split a value's text form into `n` partial pieces. Missing trailing
/// pieces bind as empty strings; a null source binds all parts null.
fn split_value(value: &Value, separator: &str, n: usize) -> Vec<Value> {
    if value.is_null() {
        return vec![Value::Null; n];
    }
    let text = value.render();
    let mut pieces: Vec<&str> = if separator.is_empty() {
        vec![text.as_str()]
    } else {
        text.splitn(n, separator).collect()
    };
    while pieces.len() < n {
        pieces.push("");
    }
    pieces
        .into_iter()
        .map(|s| Value::Str(s.to_string()))
        .collect()
}

/// Extract one mapped result from a row, joining partial pieces back
/// together with the group separator.
fn extract_result(rm: &ResultMapping, row: &RowData) -> Result<Value> {
    if rm.parts.is_empty() {
        return rm.adapter.extract(row, &rm.positions);
    }
    let mut pieces = Vec::with_capacity(rm.parts.len());
    for part in &rm.parts {
        pieces.push(part.adapter.extract(row, std::slice::from_ref(&part.pos))?);
    }
    if pieces.iter().all(Value::is_null) {
        return Ok(Value::Null);
    }
    let joined = pieces
        .iter()
        .map(Value::render)
        .collect::<Vec<_>>()
        .join(&rm.separator);
    rm.adapter.coerce(&Value::Str(joined))
}

/// Write a value through a possibly nested property chain, creating
/// intermediate beans on demand.
fn set_path(bean: &mut Bean, path: &[String], value: Value) -> Result<()> {
    let head = &path[0];
    if path.len() == 1 {
        return bean.set(head, value);
    }
    let inner_shape = bean
        .shape()
        .field_named(head)
        .and_then(|f| f.ty.as_bean().cloned())
        .ok_or_else(|| {
            Error::Execution(format!(
                "field '{}' of '{}' is not a nested bean",
                head,
                bean.shape().name
            ))
        })?;
    let mut inner = match bean.get(head) {
        Some(Value::Bean(b)) => b.clone(),
        _ => Bean::new(inner_shape),
    };
    set_path(&mut inner, &path[1..], value)?;
    bean.set(head, Value::Bean(inner))
}

fn update_result(returns: &TypeTag, counts: Vec<u64>) -> Value {
    match returns {
        TypeTag::Int => Value::Int(counts.iter().sum::<u64>() as i64),
        TypeTag::List(_) => Value::Seq(counts.into_iter().map(|c| Value::Int(c as i64)).collect()),
        _ => Value::Null,
    }
}

struct ProcedureCache {
    map: RwLock<HashMap<String, Arc<CompiledProcedure>>>,
    build: Mutex<()>,
}

fn cache() -> &'static ProcedureCache {
    static CACHE: OnceLock<ProcedureCache> = OnceLock::new();
    CACHE.get_or_init(|| ProcedureCache {
        map: RwLock::new(HashMap::new()),
        build: Mutex::new(()),
    })
}

/// Cache key for one dialect/method pair. The method signature alone is
/// not identity: two methods may share a name and types but carry
/// different templates, so the template text is hashed in as well.
fn cache_key(def: &QueryDef, dialect: &dyn Dialect) -> String {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    def.template.hash(&mut h);
    format!(
        "{}::{:?}::{}::{:016x}",
        dialect.name(),
        def.kind,
        def.method.signature(),
        h.finish()
    )
}

/// Fetch or compile the cached procedure for one method and dialect.
///
/// Concurrent misses serialize on one build lock so a procedure is
/// compiled at most once; readers never block on a build in progress.
pub fn compiled(def: &QueryDef, dialect: &Arc<dyn Dialect>) -> Result<Arc<CompiledProcedure>> {
    let key = cache_key(def, dialect.as_ref());
    let cache = cache();
    {
        let map = cache.map.read().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = map.get(&key) {
            return Ok(Arc::clone(hit));
        }
    }
    let _build = cache.build.lock().unwrap_or_else(|e| e.into_inner());
    {
        let map = cache.map.read().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = map.get(&key) {
            return Ok(Arc::clone(hit));
        }
    }
    let built = Arc::new(CompiledProcedure::compile(def, Arc::clone(dialect))?);
    cache
        .map
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(key, Arc::clone(&built));
    Ok(built)
}

/// Runtime facade over one contract: owns a connection, compiles every
/// method eagerly, and dispatches invocations by method name.
pub struct QueryObject<C: Connection> {
    conn: C,
    contract: QueryContract,
    procedures: HashMap<String, Arc<CompiledProcedure>>,
    fetch_size: usize,
    batch_size: usize,
    window: Window,
}

impl<C: Connection> QueryObject<C> {
    pub fn create(conn: C, contract: QueryContract, dialect: Arc<dyn Dialect>) -> Result<Self> {
        let mut procedures = HashMap::new();
        for def in &contract.queries {
            procedures.insert(def.method.name.clone(), compiled(def, &dialect)?);
        }
        debug!(contract = %contract.name, methods = procedures.len(), "query object ready");
        Ok(Self {
            conn,
            contract,
            procedures,
            fetch_size: 0,
            batch_size: 0,
            window: Window::default(),
        })
    }

    pub fn contract(&self) -> &QueryContract {
        &self.contract
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn set_fetch_size(&mut self, rows: usize) {
        self.fetch_size = rows;
    }

    pub fn set_batch_size(&mut self, rows: usize) {
        self.batch_size = rows;
    }

    /// Number of rows skipped by the next select invocation.
    pub fn set_first_result(&mut self, first: usize) {
        self.window.first = first;
    }

    /// Row cap for the next select invocation; 0 disables paging.
    pub fn set_max_results(&mut self, max: usize) {
        self.window.max = max;
    }

    /// Invoke a contract method by name. The paging window applies to this
    /// invocation only and is cleared on every exit, error included.
    pub fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Value> {
        let procedure = self
            .procedures
            .get(method)
            .cloned()
            .ok_or_else(|| Error::Execution(format!("no query method named '{}'", method)))?;
        let opts = Invocation {
            fetch_size: self.fetch_size,
            batch_size: self.batch_size,
            window: self.window,
        };
        let outcome = procedure.invoke(&self.conn, args, &opts);
        self.window = Window::default();
        outcome
    }
}
