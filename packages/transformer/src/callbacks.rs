//! Named resolver callbacks and their dispatch.
//!
//! Every callback kind has a fixed signature and is stored under its name as
//! one `Callback` variant. `Registry::invoke` pairs the stored variant with
//! the requested `Invocation` and reports a missing name or a kind mismatch
//! as `Error::Internal`, since a schema may name a callback that is not
//! linked into every build.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use xlate_core::{Error, Fields, OpRowMaps, Operation, Path, RowMap, Value};
use xlate_kvstore::DbHandles;

/// Scratch space shared by every callback of one request.
pub type TxCache = BTreeMap<String, Value>;

/// The parameter envelope handed to every resolver.
pub struct XfmrParams<'a> {
    pub stores: &'a DbHandles<'a>,
    pub oper: Operation,
    /// Instance path the callback runs for.
    pub uri: &'a Path,
    /// Path the request targeted.
    pub request_uri: &'a Path,
    /// Payload at `uri`, for writes.
    pub payload: Option<&'a Value>,
    /// The leaf value for field callbacks, or the declared default while
    /// defaults are filled.
    pub param: Option<&'a Value>,
    pub table: Option<&'a str>,
    pub key: Option<&'a str>,
    /// The stored row, for from-db field callbacks.
    pub row: Option<&'a Fields>,
    pub cache: &'a RefCell<TxCache>,
}

/// What a table transformer resolved for one instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableXfmrOutput {
    pub tables: Vec<String>,
    pub virtual_table: bool,
    /// The instance writes into a row some other node owns.
    pub not_owner: bool,
}

impl TableXfmrOutput {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            tables: vec![name.into()],
            ..Default::default()
        }
    }
}

/// Rows produced by a subtree transformer in the to-db direction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubtreeWrite {
    /// Rows for the operation being translated.
    pub rows: RowMap,
    /// Side-effect rows for other operations.
    pub sub_ops: OpRowMaps,
}

impl From<RowMap> for SubtreeWrite {
    fn from(rows: RowMap) -> Self {
        Self {
            rows,
            sub_ops: OpRowMaps::new(),
        }
    }
}

/// Parameters of a cascade-delete callback: one dependent row of a row
/// being deleted.
pub struct CascadeParams<'a> {
    pub stores: &'a DbHandles<'a>,
    pub oper: Operation,
    /// The deleted row, as `TABLE|key`.
    pub ref_key: &'a str,
    pub table: &'a str,
    pub key: &'a str,
    /// The referencing fields; empty when the whole row depends on the
    /// deleted one.
    pub fields: &'a Fields,
    /// Every row delete of the transaction so far.
    pub deletes: &'a RowMap,
}

pub type FieldToDbFn = Box<dyn Fn(&XfmrParams<'_>) -> Result<Fields, Error> + Send + Sync>;
pub type FieldFromDbFn =
    Box<dyn Fn(&XfmrParams<'_>) -> Result<BTreeMap<String, Value>, Error> + Send + Sync>;
pub type KeyToDbFn = Box<dyn Fn(&XfmrParams<'_>) -> Result<String, Error> + Send + Sync>;
pub type KeyFromDbFn =
    Box<dyn Fn(&XfmrParams<'_>) -> Result<BTreeMap<String, Value>, Error> + Send + Sync>;
pub type TableFn = Box<dyn Fn(&XfmrParams<'_>) -> Result<TableXfmrOutput, Error> + Send + Sync>;
pub type SubtreeToDbFn = Box<dyn Fn(&XfmrParams<'_>) -> Result<SubtreeWrite, Error> + Send + Sync>;
pub type SubtreeFromDbFn = Box<dyn Fn(&XfmrParams<'_>) -> Result<Value, Error> + Send + Sync>;
pub type ValidateFn = Box<dyn Fn(&XfmrParams<'_>) -> bool + Send + Sync>;
pub type PreFn = Box<dyn Fn(&XfmrParams<'_>) -> Result<(), Error> + Send + Sync>;
pub type PostFn = Box<dyn Fn(&XfmrParams<'_>, &mut OpRowMaps) -> Result<(), Error> + Send + Sync>;
pub type CascadeFn = Box<dyn Fn(&CascadeParams<'_>) -> Result<OpRowMaps, Error> + Send + Sync>;

/// A field transformer. Either direction may be absent.
#[derive(Default)]
pub struct FieldXfmr {
    pub to_db: Option<FieldToDbFn>,
    pub from_db: Option<FieldFromDbFn>,
}

impl FieldXfmr {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_to_db(
        mut self,
        f: impl Fn(&XfmrParams<'_>) -> Result<Fields, Error> + Send + Sync + 'static,
    ) -> Self {
        self.to_db = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_from_db(
        mut self,
        f: impl Fn(&XfmrParams<'_>) -> Result<BTreeMap<String, Value>, Error> + Send + Sync + 'static,
    ) -> Self {
        self.from_db = Some(Box::new(f));
        self
    }
}

/// A key transformer.
#[derive(Default)]
pub struct KeyXfmr {
    pub to_db: Option<KeyToDbFn>,
    pub from_db: Option<KeyFromDbFn>,
}

impl KeyXfmr {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_to_db(
        mut self,
        f: impl Fn(&XfmrParams<'_>) -> Result<String, Error> + Send + Sync + 'static,
    ) -> Self {
        self.to_db = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_from_db(
        mut self,
        f: impl Fn(&XfmrParams<'_>) -> Result<BTreeMap<String, Value>, Error> + Send + Sync + 'static,
    ) -> Self {
        self.from_db = Some(Box::new(f));
        self
    }
}

/// A subtree transformer.
#[derive(Default)]
pub struct SubtreeXfmr {
    pub to_db: Option<SubtreeToDbFn>,
    pub from_db: Option<SubtreeFromDbFn>,
}

impl SubtreeXfmr {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_to_db(
        mut self,
        f: impl Fn(&XfmrParams<'_>) -> Result<SubtreeWrite, Error> + Send + Sync + 'static,
    ) -> Self {
        self.to_db = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_from_db(
        mut self,
        f: impl Fn(&XfmrParams<'_>) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        self.from_db = Some(Box::new(f));
        self
    }
}

pub enum Callback {
    Field(FieldXfmr),
    Key(KeyXfmr),
    Table(TableFn),
    Subtree(SubtreeXfmr),
    Validate(ValidateFn),
    Pre(PreFn),
    Post(PostFn),
    Cascade(CascadeFn),
}

impl Callback {
    pub fn table(
        f: impl Fn(&XfmrParams<'_>) -> Result<TableXfmrOutput, Error> + Send + Sync + 'static,
    ) -> Self {
        Callback::Table(Box::new(f))
    }

    pub fn validate(f: impl Fn(&XfmrParams<'_>) -> bool + Send + Sync + 'static) -> Self {
        Callback::Validate(Box::new(f))
    }

    pub fn pre(f: impl Fn(&XfmrParams<'_>) -> Result<(), Error> + Send + Sync + 'static) -> Self {
        Callback::Pre(Box::new(f))
    }

    pub fn post(
        f: impl Fn(&XfmrParams<'_>, &mut OpRowMaps) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Self {
        Callback::Post(Box::new(f))
    }

    pub fn cascade(
        f: impl Fn(&CascadeParams<'_>) -> Result<OpRowMaps, Error> + Send + Sync + 'static,
    ) -> Self {
        Callback::Cascade(Box::new(f))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Callback::Field(_) => "field",
            Callback::Key(_) => "key",
            Callback::Table(_) => "table",
            Callback::Subtree(_) => "subtree",
            Callback::Validate(_) => "validate",
            Callback::Pre(_) => "pre",
            Callback::Post(_) => "post",
            Callback::Cascade(_) => "cascade",
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback::{}", self.kind())
    }
}

impl From<FieldXfmr> for Callback {
    fn from(x: FieldXfmr) -> Self {
        Callback::Field(x)
    }
}

impl From<KeyXfmr> for Callback {
    fn from(x: KeyXfmr) -> Self {
        Callback::Key(x)
    }
}

impl From<SubtreeXfmr> for Callback {
    fn from(x: SubtreeXfmr) -> Self {
        Callback::Subtree(x)
    }
}

/// One call, carrying the arguments of its kind.
pub enum Invocation<'p, 'a> {
    FieldToDb(&'p XfmrParams<'a>),
    FieldFromDb(&'p XfmrParams<'a>),
    KeyToDb(&'p XfmrParams<'a>),
    KeyFromDb(&'p XfmrParams<'a>),
    Table(&'p XfmrParams<'a>),
    SubtreeToDb(&'p XfmrParams<'a>),
    SubtreeFromDb(&'p XfmrParams<'a>),
    Validate(&'p XfmrParams<'a>),
    Pre(&'p XfmrParams<'a>),
    Post(&'p XfmrParams<'a>, &'p mut OpRowMaps),
    Cascade(&'p CascadeParams<'a>),
}

impl Invocation<'_, '_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Invocation::FieldToDb(_) => "field to-db",
            Invocation::FieldFromDb(_) => "field from-db",
            Invocation::KeyToDb(_) => "key to-db",
            Invocation::KeyFromDb(_) => "key from-db",
            Invocation::Table(_) => "table",
            Invocation::SubtreeToDb(_) => "subtree to-db",
            Invocation::SubtreeFromDb(_) => "subtree from-db",
            Invocation::Validate(_) => "validate",
            Invocation::Pre(_) => "pre",
            Invocation::Post(..) => "post",
            Invocation::Cascade(_) => "cascade",
        }
    }
}

/// The result of one call.
#[derive(Debug)]
pub enum Outcome {
    Fields(Fields),
    Leaves(BTreeMap<String, Value>),
    Key(String),
    Tables(TableXfmrOutput),
    Rows(SubtreeWrite),
    Tree(Value),
    Verdict(bool),
    Done,
    Cascade(OpRowMaps),
}

/// Name of the cascade-delete callback of a table.
pub fn cascade_callback_name(table: &str) -> String {
    format!("{}_cascade_cfg_hdl", table)
}

/// Callbacks by name.
#[derive(Default)]
pub struct Registry {
    callbacks: BTreeMap<String, Callback>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.callbacks.iter()).finish()
    }
}

fn direction<'c, F: ?Sized>(
    name: &str,
    which: &str,
    slot: &'c Option<Box<F>>,
) -> Result<&'c F, Error> {
    slot.as_deref().ok_or_else(|| {
        Error::internal(format!("callback '{}' has no {} direction", name, which))
    })
}

fn unexpected(name: &str, outcome: &Outcome) -> Error {
    Error::internal(format!("callback '{}' returned {:?}", name, outcome))
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `name`, handing back whatever was there.
    pub fn register(&mut self, name: impl Into<String>, callback: impl Into<Callback>) -> Option<Callback> {
        let name = name.into();
        let callback = callback.into();
        debug!("register {} callback '{}'", callback.kind(), name);
        self.callbacks.insert(name, callback)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Call `name` with the arguments in `call`.
    pub fn invoke(&self, name: &str, call: Invocation<'_, '_>) -> Result<Outcome, Error> {
        let callback = self
            .callbacks
            .get(name)
            .ok_or_else(|| Error::internal(format!("callback '{}' is not registered", name)))?;
        let wanted = call.kind();
        debug!("invoke {} callback '{}'", wanted, name);

        match (callback, call) {
            (Callback::Field(x), Invocation::FieldToDb(p)) => {
                Ok(Outcome::Fields(direction(name, "to-db", &x.to_db)?(p)?))
            }
            (Callback::Field(x), Invocation::FieldFromDb(p)) => {
                Ok(Outcome::Leaves(direction(name, "from-db", &x.from_db)?(p)?))
            }
            (Callback::Key(x), Invocation::KeyToDb(p)) => {
                Ok(Outcome::Key(direction(name, "to-db", &x.to_db)?(p)?))
            }
            (Callback::Key(x), Invocation::KeyFromDb(p)) => {
                Ok(Outcome::Leaves(direction(name, "from-db", &x.from_db)?(p)?))
            }
            (Callback::Table(f), Invocation::Table(p)) => Ok(Outcome::Tables(f(p)?)),
            (Callback::Subtree(x), Invocation::SubtreeToDb(p)) => {
                Ok(Outcome::Rows(direction(name, "to-db", &x.to_db)?(p)?))
            }
            (Callback::Subtree(x), Invocation::SubtreeFromDb(p)) => {
                Ok(Outcome::Tree(direction(name, "from-db", &x.from_db)?(p)?))
            }
            (Callback::Validate(f), Invocation::Validate(p)) => Ok(Outcome::Verdict(f(p))),
            (Callback::Pre(f), Invocation::Pre(p)) => {
                f(p)?;
                Ok(Outcome::Done)
            }
            (Callback::Post(f), Invocation::Post(p, ops)) => {
                f(p, ops)?;
                Ok(Outcome::Done)
            }
            (Callback::Cascade(f), Invocation::Cascade(p)) => Ok(Outcome::Cascade(f(p)?)),
            (callback, _) => Err(Error::internal(format!(
                "callback '{}' is a {} callback, invoked as {}",
                name,
                callback.kind(),
                wanted
            ))),
        }
    }

    pub fn field_to_db(&self, name: &str, params: &XfmrParams<'_>) -> Result<Fields, Error> {
        match self.invoke(name, Invocation::FieldToDb(params))? {
            Outcome::Fields(fields) => Ok(fields),
            other => Err(unexpected(name, &other)),
        }
    }

    pub fn field_from_db(
        &self,
        name: &str,
        params: &XfmrParams<'_>,
    ) -> Result<BTreeMap<String, Value>, Error> {
        match self.invoke(name, Invocation::FieldFromDb(params))? {
            Outcome::Leaves(leaves) => Ok(leaves),
            other => Err(unexpected(name, &other)),
        }
    }

    pub fn key_to_db(&self, name: &str, params: &XfmrParams<'_>) -> Result<String, Error> {
        match self.invoke(name, Invocation::KeyToDb(params))? {
            Outcome::Key(key) => Ok(key),
            other => Err(unexpected(name, &other)),
        }
    }

    pub fn key_from_db(
        &self,
        name: &str,
        params: &XfmrParams<'_>,
    ) -> Result<BTreeMap<String, Value>, Error> {
        match self.invoke(name, Invocation::KeyFromDb(params))? {
            Outcome::Leaves(leaves) => Ok(leaves),
            other => Err(unexpected(name, &other)),
        }
    }

    pub fn table(&self, name: &str, params: &XfmrParams<'_>) -> Result<TableXfmrOutput, Error> {
        match self.invoke(name, Invocation::Table(params))? {
            Outcome::Tables(out) => Ok(out),
            other => Err(unexpected(name, &other)),
        }
    }

    pub fn subtree_to_db(&self, name: &str, params: &XfmrParams<'_>) -> Result<SubtreeWrite, Error> {
        match self.invoke(name, Invocation::SubtreeToDb(params))? {
            Outcome::Rows(rows) => Ok(rows),
            other => Err(unexpected(name, &other)),
        }
    }

    pub fn subtree_from_db(&self, name: &str, params: &XfmrParams<'_>) -> Result<Value, Error> {
        match self.invoke(name, Invocation::SubtreeFromDb(params))? {
            Outcome::Tree(tree) => Ok(tree),
            other => Err(unexpected(name, &other)),
        }
    }

    pub fn validate(&self, name: &str, params: &XfmrParams<'_>) -> Result<bool, Error> {
        match self.invoke(name, Invocation::Validate(params))? {
            Outcome::Verdict(ok) => Ok(ok),
            other => Err(unexpected(name, &other)),
        }
    }

    pub fn pre(&self, name: &str, params: &XfmrParams<'_>) -> Result<(), Error> {
        self.invoke(name, Invocation::Pre(params)).map(|_| ())
    }

    pub fn post(&self, name: &str, params: &XfmrParams<'_>, ops: &mut OpRowMaps) -> Result<(), Error> {
        self.invoke(name, Invocation::Post(params, ops)).map(|_| ())
    }

    pub fn cascade(&self, name: &str, params: &CascadeParams<'_>) -> Result<OpRowMaps, Error> {
        match self.invoke(name, Invocation::Cascade(params))? {
            Outcome::Cascade(ops) => Ok(ops),
            other => Err(unexpected(name, &other)),
        }
    }
}
