//! The field algebra.
//!
//! A [`Fields`] value is either a *defined* list of columns (each a name or an
//! ordinal position, optionally typed and carrying a comparator) or one of
//! nine sentinels that are resolved against context while an assembly is
//! being built. Sentinels never reach a tuple.
//!
//! Every operation returns a new value; a `Fields` is never mutated after
//! construction. Derived views (the name index and the ordered flag) are
//! computed on first use and memoized.
//!
//! Positions are interpreted by a single rule, [`translate_position`]:
//! negative values count from the end.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{FieldType, Scalar};

/// A column identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    Name(String),
    Pos(i32),
}

impl Field {
    pub fn name(&self) -> Option<&str> {
        match self {
            Field::Name(n) => Some(n),
            Field::Pos(_) => None,
        }
    }

    pub fn is_pos(&self) -> bool {
        matches!(self, Field::Pos(_))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Name(n) => write!(f, "'{n}'"),
            Field::Pos(p) => write!(f, "{p}"),
        }
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Name(v.to_string())
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::Name(v)
    }
}

impl From<&String> for Field {
    fn from(v: &String) -> Self {
        Field::Name(v.clone())
    }
}

impl From<i32> for Field {
    fn from(v: i32) -> Self {
        Field::Pos(v)
    }
}

impl From<&Field> for Field {
    fn from(v: &Field) -> Self {
        v.clone()
    }
}

/// Custom ordering for the values of one column (grouping and sorting keys).
pub trait ValueComparator: Send + Sync + fmt::Debug {
    fn compare(&self, a: &Scalar, b: &Scalar) -> Ordering;
}

/// One column of a defined `Fields`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Column {
    pub field: Field,
    pub field_type: Option<FieldType>,
    #[serde(skip)]
    pub comparator: Option<Arc<dyn ValueComparator>>,
}

impl Column {
    pub fn new(field: impl Into<Field>) -> Self {
        Self {
            field: field.into(),
            field_type: None,
            comparator: None,
        }
    }

    pub fn typed(field: impl Into<Field>, field_type: FieldType) -> Self {
        Self {
            field: field.into(),
            field_type: Some(field_type),
            comparator: None,
        }
    }

    /// Copy of `self` with metadata from `over` taking precedence where present.
    fn overlaid(&self, over: &Column) -> Column {
        Column {
            field: self.field.clone(),
            field_type: over.field_type.or(self.field_type),
            comparator: over.comparator.clone().or_else(|| self.comparator.clone()),
        }
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Column");
        d.field("field", &self.field);
        if let Some(t) = &self.field_type {
            d.field("type", t);
        }
        if let Some(c) = &self.comparator {
            d.field("comparator", c);
        }
        d.finish()
    }
}

/// The reserved "meaning" schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentinel {
    /// Fields exist but are not known until run time.
    Unknown,
    /// No fields.
    None,
    /// All fields currently available.
    All,
    /// The grouping key of the current grouping.
    Group,
    /// Every field that is not part of the grouping key.
    Values,
    /// The arguments of the current operation.
    Args,
    /// The results of the current operation.
    Results,
    /// Overwrite the arguments in place with the results.
    Replace,
    /// Drop the arguments and append the results.
    Swap,
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sentinel::Unknown => "UNKNOWN",
            Sentinel::None => "NONE",
            Sentinel::All => "ALL",
            Sentinel::Group => "GROUP",
            Sentinel::Values => "VALUES",
            Sentinel::Args => "ARGS",
            Sentinel::Results => "RESULTS",
            Sentinel::Replace => "REPLACE",
            Sentinel::Swap => "SWAP",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Shape {
    Defined(Vec<Column>),
    Sentinel(Sentinel),
}

#[derive(Debug, Default, Clone)]
struct Index {
    names: HashMap<String, usize>,
    ordered: bool,
}

/// A schema / selector / declarator.
#[derive(Clone, Serialize, Deserialize)]
pub struct Fields {
    shape: Shape,
    #[serde(skip)]
    index: OnceCell<Index>,
}

/// Resolve `pos` against a schema of `size` columns. Negative positions count
/// from the end. Returns `None` when the position falls outside the schema.
pub fn translate_position(pos: i32, size: usize) -> Option<usize> {
    let size = size as i64;
    let pos = pos as i64;
    let abs = if pos < 0 { size + pos } else { pos };
    if abs < 0 || abs >= size {
        None
    } else {
        Some(abs as usize)
    }
}

fn duplicate_name(columns: &[Column]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(columns.len());
    columns
        .iter()
        .filter_map(|c| c.field.name())
        .find(|name| !seen.insert(*name))
}

fn print_all(contexts: &[&Fields]) -> String {
    contexts
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" + ")
}

impl Fields {
    fn sentinel_of(sentinel: Sentinel) -> Self {
        Self {
            shape: Shape::Sentinel(sentinel),
            index: OnceCell::new(),
        }
    }

    fn defined(columns: Vec<Column>) -> Self {
        Self {
            shape: Shape::Defined(columns),
            index: OnceCell::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::sentinel_of(Sentinel::Unknown)
    }

    pub fn none() -> Self {
        Self::sentinel_of(Sentinel::None)
    }

    pub fn all() -> Self {
        Self::sentinel_of(Sentinel::All)
    }

    pub fn group() -> Self {
        Self::sentinel_of(Sentinel::Group)
    }

    pub fn values() -> Self {
        Self::sentinel_of(Sentinel::Values)
    }

    pub fn args() -> Self {
        Self::sentinel_of(Sentinel::Args)
    }

    pub fn results() -> Self {
        Self::sentinel_of(Sentinel::Results)
    }

    pub fn replace() -> Self {
        Self::sentinel_of(Sentinel::Replace)
    }

    pub fn swap() -> Self {
        Self::sentinel_of(Sentinel::Swap)
    }

    /// Selector for the first column.
    pub fn first() -> Self {
        Self::defined(vec![Column::new(0)])
    }

    /// Selector for the last column.
    pub fn last() -> Self {
        Self::defined(vec![Column::new(-1)])
    }

    /// A defined schema with zero columns (distinct from `none()`).
    pub fn empty() -> Self {
        Self::defined(Vec::new())
    }

    /// Ordinal schema `0..n`. Positions are `i32`, so `n` is capped there.
    pub fn size(n: usize) -> Result<Self> {
        let n = i32::try_from(n)
            .map_err(|_| Error::Invariant(format!("{n} columns exceed the position range")))?;
        Ok(Self::defined((0..n).map(Column::new).collect()))
    }

    /// Defined fields from names and/or positions. Duplicate names are rejected.
    pub fn new<I, F>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        Self::from_columns(fields.into_iter().map(Column::new).collect())
    }

    /// Defined, typed fields.
    pub fn typed<I, F>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (F, FieldType)>,
        F: Into<Field>,
    {
        Self::from_columns(
            fields
                .into_iter()
                .map(|(f, t)| Column::typed(f, t))
                .collect(),
        )
    }

    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        if let Some(name) = duplicate_name(&columns) {
            return Err(Error::SchemaConflict(format!(
                "duplicate field name found: '{name}'"
            )));
        }
        Ok(Self::defined(columns))
    }

    // ----- kind predicates -----

    pub fn sentinel(&self) -> Option<Sentinel> {
        match &self.shape {
            Shape::Sentinel(s) => Some(*s),
            Shape::Defined(_) => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self.shape, Shape::Defined(_))
    }

    pub fn is_unknown(&self) -> bool {
        self.sentinel() == Some(Sentinel::Unknown)
    }

    pub fn is_none(&self) -> bool {
        self.sentinel() == Some(Sentinel::None)
    }

    pub fn is_all(&self) -> bool {
        self.sentinel() == Some(Sentinel::All)
    }

    pub fn is_group(&self) -> bool {
        self.sentinel() == Some(Sentinel::Group)
    }

    pub fn is_values(&self) -> bool {
        self.sentinel() == Some(Sentinel::Values)
    }

    pub fn is_args(&self) -> bool {
        self.sentinel() == Some(Sentinel::Args)
    }

    pub fn is_results(&self) -> bool {
        self.sentinel() == Some(Sentinel::Results)
    }

    pub fn is_replace(&self) -> bool {
        self.sentinel() == Some(Sentinel::Replace)
    }

    pub fn is_swap(&self) -> bool {
        self.sentinel() == Some(Sentinel::Swap)
    }

    /// Sentinels that stand in for other fields and must be substituted.
    pub fn is_substitution(&self) -> bool {
        matches!(
            self.sentinel(),
            Some(
                Sentinel::All
                    | Sentinel::Group
                    | Sentinel::Values
                    | Sentinel::Args
                    | Sentinel::Results
                    | Sentinel::Replace
                    | Sentinel::Swap
            )
        )
    }

    /// True iff every position equals its own index. Only ordered fields may
    /// declare columns; unordered ones are selectors.
    pub fn is_ordered(&self) -> bool {
        !self.is_defined() || self.index().ordered
    }

    /// True if these fields can name what a producer emits.
    pub fn is_declarator(&self) -> bool {
        match self.sentinel() {
            Some(s) => matches!(
                s,
                Sentinel::Unknown
                    | Sentinel::None
                    | Sentinel::All
                    | Sentinel::Group
                    | Sentinel::Values
                    | Sentinel::Args
            ),
            None => self.is_ordered(),
        }
    }

    // ----- accessors -----

    pub fn columns(&self) -> &[Column] {
        match &self.shape {
            Shape::Defined(c) => c,
            Shape::Sentinel(_) => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.columns().len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns().is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Field> {
        self.columns().get(i).map(|c| &c.field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.columns().iter().map(|c| &c.field)
    }

    /// Names of the named columns, in order.
    pub fn names(&self) -> Vec<&str> {
        self.iter().filter_map(Field::name).collect()
    }

    pub fn field_type(&self, i: usize) -> Option<FieldType> {
        self.columns().get(i).and_then(|c| c.field_type)
    }

    pub fn types(&self) -> Vec<Option<FieldType>> {
        self.columns().iter().map(|c| c.field_type).collect()
    }

    pub fn has_types(&self) -> bool {
        self.columns().iter().any(|c| c.field_type.is_some())
    }

    pub fn comparator(&self, i: usize) -> Option<&Arc<dyn ValueComparator>> {
        self.columns().get(i).and_then(|c| c.comparator.as_ref())
    }

    pub fn has_comparators(&self) -> bool {
        self.columns().iter().any(|c| c.comparator.is_some())
    }

    fn index(&self) -> &Index {
        self.index.get_or_init(|| {
            let columns = self.columns();
            let mut names = HashMap::with_capacity(columns.len());
            let mut ordered = true;
            for (i, c) in columns.iter().enumerate() {
                match &c.field {
                    Field::Name(n) => {
                        names.insert(n.clone(), i);
                    }
                    Field::Pos(p) => {
                        if *p < 0 || *p as usize != i {
                            ordered = false;
                        }
                    }
                }
            }
            Index { names, ordered }
        })
    }

    /// Index of `field` in these fields, if resolvable.
    pub fn index_of_safe(&self, field: &Field) -> Option<usize> {
        match field {
            Field::Name(n) => self.index().names.get(n).copied(),
            Field::Pos(p) => translate_position(*p, self.len()),
        }
    }

    pub fn index_of(&self, field: impl Into<Field>) -> Result<usize> {
        let field = field.into();
        self.index_of_safe(&field)
            .ok_or_else(|| Error::unresolved(self, vec![field.to_string()]))
    }

    /// True if every column of `other` resolves in `self`.
    pub fn contains(&self, other: &Fields) -> bool {
        match other.sentinel() {
            Some(Sentinel::None) => true,
            Some(_) => false,
            None => self.pos(other).is_ok(),
        }
    }

    /// Positions in `self` addressed by `selector`. Reports every unresolved
    /// column at once.
    pub fn pos(&self, selector: &Fields) -> Result<Vec<usize>> {
        match selector.sentinel() {
            Some(Sentinel::All) => return Ok((0..self.len()).collect()),
            Some(Sentinel::None) => return Ok(Vec::new()),
            Some(_) => {
                return Err(Error::SchemaConflict(format!(
                    "cannot resolve positions of {selector} in {self}"
                )))
            }
            None => {}
        }
        if !self.is_defined() {
            return Err(Error::unresolved(
                self,
                selector.iter().map(|f| f.to_string()).collect(),
            ));
        }

        let mut missing = Vec::new();
        let mut out = Vec::with_capacity(selector.len());
        for field in selector.iter() {
            match self.index_of_safe(field) {
                Some(i) => out.push(i),
                None => missing.push(field.to_string()),
            }
        }
        if missing.is_empty() {
            Ok(out)
        } else {
            Err(Error::unresolved(self, missing))
        }
    }

    // ----- algebra -----

    /// The subsequence of `self` named by `selector`.
    ///
    /// Metadata on the selector's columns (types, comparators) overrides the
    /// metadata carried by `self`.
    pub fn select(&self, selector: &Fields) -> Result<Fields> {
        if selector.is_all() {
            return Ok(self.clone());
        }
        if self.is_unknown() {
            return Ok(selector.clone());
        }
        if selector.is_none() {
            return Ok(Fields::none());
        }
        if !self.is_defined() {
            return Err(Error::SchemaConflict(format!(
                "cannot select {selector} from {self}"
            )));
        }
        if !self.is_ordered() {
            return Err(Error::SchemaConflict(format!(
                "{self} can only be used as a selector"
            )));
        }
        if !selector.is_defined() {
            return Err(Error::SchemaConflict(format!(
                "unable to use given selector: {selector}"
            )));
        }

        let positions = self.pos(selector)?;
        let source = self.columns();
        let columns = positions
            .iter()
            .zip(selector.columns())
            .enumerate()
            .map(|(i, (&p, sel))| {
                let mut column = source[p].overlaid(sel);
                if column.field.is_pos() {
                    column.field = Field::Pos(i as i32);
                }
                column
            })
            .collect();
        Fields::from_columns(columns)
    }

    /// Concatenate two column lists.
    ///
    /// Positions are kept as written rather than re-absolutized so selectors
    /// can be built incrementally.
    pub fn append(&self, other: &Fields) -> Result<Fields> {
        if self.is_all() || other.is_all() {
            return Err(Error::SchemaConflict(format!(
                "cannot append fields: {self} + {other}"
            )));
        }
        if self.is_unknown() || other.is_unknown() {
            return Ok(Fields::unknown());
        }
        if other.is_none() {
            return Ok(self.clone());
        }
        if self.is_none() {
            return Ok(other.clone());
        }
        if !self.is_defined() || !other.is_defined() {
            return Err(Error::SchemaConflict(format!(
                "cannot append substitution fields: {self} + {other}"
            )));
        }

        let mut columns = Vec::with_capacity(self.len() + other.len());
        columns.extend_from_slice(self.columns());
        columns.extend_from_slice(other.columns());
        if let Some(name) = duplicate_name(&columns) {
            return Err(Error::SchemaConflict(format!(
                "cannot append fields: {self} + {other}, field name already exists: '{name}'"
            )));
        }
        Ok(Fields::defined(columns))
    }

    /// Columns of `self` with every column addressed by `other` removed.
    pub fn subtract(&self, other: &Fields) -> Result<Fields> {
        if other.is_all() {
            return Ok(Fields::empty());
        }
        if other.is_none() {
            return Ok(self.clone());
        }
        if self.is_unknown() {
            return Ok(Fields::unknown());
        }
        if !(self.is_defined() || self.is_none()) || !other.is_defined() {
            return Err(Error::SchemaConflict(format!(
                "cannot subtract {other} from {self}"
            )));
        }

        let removed: HashSet<usize> = self.pos(other)?.into_iter().collect();
        let columns = self
            .columns()
            .iter()
            .enumerate()
            .filter(|(i, _)| !removed.contains(i))
            .map(|(_, c)| c.clone())
            .collect();
        Ok(Fields::defined(columns))
    }

    /// Set union of all inputs; the first occurrence of a column wins.
    pub fn merge(items: &[&Fields]) -> Result<Fields> {
        let mut columns = Vec::new();
        let mut seen = HashSet::new();
        let mut any_defined = false;

        for fields in items {
            match fields.sentinel() {
                Some(Sentinel::All) => return Ok(Fields::all()),
                Some(Sentinel::Unknown) => return Ok(Fields::unknown()),
                Some(Sentinel::None) => continue,
                Some(s) => {
                    return Err(Error::SchemaConflict(format!(
                        "cannot merge substitution fields {s}"
                    )))
                }
                None => {}
            }
            any_defined = true;
            for c in fields.columns() {
                if seen.insert(c.field.clone()) {
                    columns.push(c.clone());
                }
            }
        }

        if any_defined {
            Ok(Fields::defined(columns))
        } else {
            Ok(Fields::none())
        }
    }

    /// Concatenate declarations, e.g. the branches of a co-group.
    ///
    /// Duplicate names fail unless `mask_duplicates` is set, in which case
    /// every earlier occurrence is replaced by its absolute position and the
    /// last occurrence keeps the name.
    pub fn join(mask_duplicates: bool, items: &[&Fields]) -> Result<Fields> {
        let mut columns: Vec<Column> = Vec::new();
        for fields in items {
            if fields.is_none() {
                continue;
            }
            if !fields.is_defined() {
                return Err(Error::SchemaConflict(format!(
                    "cannot join fields if one is a substitution or is unknown: {fields}"
                )));
            }
            columns.extend_from_slice(fields.columns());
        }

        if mask_duplicates {
            let mut names = HashSet::new();
            for i in (0..columns.len()).rev() {
                let duplicate = match &columns[i].field {
                    Field::Name(n) => !names.insert(n.clone()),
                    Field::Pos(_) => false,
                };
                if duplicate {
                    columns[i].field = Field::Pos(i as i32);
                }
            }
        } else if let Some(name) = duplicate_name(&columns) {
            return Err(Error::SchemaConflict(format!(
                "cannot join fields {}, field name already exists: '{name}'",
                print_all(items)
            )));
        }
        Ok(Fields::defined(columns))
    }

    /// Rename the columns addressed by `from` to the columns of `to`.
    pub fn rename(&self, from: &Fields, to: &Fields) -> Result<Fields> {
        if !self.is_defined() {
            return Err(Error::SchemaConflict(format!("cannot rename {self}")));
        }
        if !from.is_defined() || !to.is_defined() || from.len() != to.len() {
            return Err(Error::SchemaConflict(format!(
                "rename requires defined fields of equal size, from: {from} to: {to}"
            )));
        }

        let positions = self.pos(from)?;
        let mut columns = self.columns().to_vec();
        for (p, target) in positions.iter().zip(to.columns()) {
            columns[*p].field = target.field.clone();
            if target.field_type.is_some() {
                columns[*p].field_type = target.field_type;
            }
        }
        Fields::from_columns(columns)
    }

    /// Project `declaration` through `self`: named columns of the declaration
    /// are kept, positional ones take the identity of the column of `self` at
    /// that position. Declared metadata wins.
    pub fn project(&self, declaration: &Fields) -> Result<Fields> {
        match declaration.sentinel() {
            Some(Sentinel::Args) => return Ok(self.clone()),
            Some(_) => return Ok(declaration.clone()),
            None => {}
        }

        let mut columns = Vec::with_capacity(declaration.len());
        for c in declaration.columns() {
            match &c.field {
                Field::Name(_) => columns.push(c.clone()),
                Field::Pos(p) => {
                    let idx = translate_position(*p, self.len())
                        .ok_or_else(|| Error::unresolved(self, vec![p.to_string()]))?;
                    columns.push(self.columns()[idx].overlaid(c));
                }
            }
        }
        Fields::from_columns(columns)
    }

    /// Turn a selector into an absolute declarator by replacing relative
    /// positions with their absolute index. Anything that cannot be made
    /// ordered becomes `unknown()`.
    pub fn as_declaration(&self) -> Fields {
        match self.sentinel() {
            Some(Sentinel::None) => return self.clone(),
            Some(_) => return Fields::unknown(),
            None => {}
        }
        if self.is_ordered() {
            return self.clone();
        }

        let size = self.len();
        let mut columns = Vec::with_capacity(size);
        for c in self.columns() {
            let mut column = c.clone();
            if let Field::Pos(p) = c.field {
                match translate_position(p, size) {
                    Some(abs) => column.field = Field::Pos(abs as i32),
                    None => return Fields::unknown(),
                }
            }
            columns.push(column);
        }

        let declared = Fields::defined(columns);
        if declared.is_ordered() {
            declared
        } else {
            Fields::unknown()
        }
    }

    /// Resolve `selector` against one or more context fields, in order.
    ///
    /// Names are looked up in every context and the first context holding a
    /// name wins, including its type. Positions address the concatenation of
    /// all contexts. Every unresolved name is reported together. When any
    /// context is unknown the selector cannot be checked and is returned as is.
    ///
    /// `replace()` expects `[incoming, declared]` and returns the incoming
    /// fields with the declared columns' types written over them.
    pub fn resolve(selector: &Fields, contexts: &[&Fields]) -> Result<Fields> {
        let mut has_unknown = false;
        let mut total = 0usize;
        for ctx in contexts {
            if ctx.is_unknown() {
                has_unknown = true;
                continue;
            }
            if ctx.is_none() {
                continue;
            }
            if !ctx.is_defined() {
                return Err(Error::SchemaConflict(format!(
                    "unable to select from field set: {ctx}"
                )));
            }
            total += ctx.len();
        }

        if selector.is_all() {
            let mut result = Fields::none();
            for ctx in contexts {
                result = result.append(ctx)?;
            }
            return Ok(result);
        }
        if selector.is_replace() {
            return Self::resolve_replace(contexts);
        }
        if !selector.is_defined() {
            return Err(Error::SchemaConflict(format!(
                "unable to use given selector: {selector}"
            )));
        }
        if has_unknown {
            return Ok(selector.clone());
        }

        let mut missing = Vec::new();
        let mut columns = Vec::with_capacity(selector.len());
        for (i, sel) in selector.columns().iter().enumerate() {
            let found = match &sel.field {
                Field::Name(_) => Self::find_named(contexts, &sel.field),
                Field::Pos(p) => {
                    translate_position(*p, total).and_then(|abs| Self::locate(contexts, abs))
                }
            };
            match found {
                Some(src) => {
                    let mut column = src.overlaid(sel);
                    if column.field.is_pos() {
                        column.field = Field::Pos(i as i32);
                    }
                    columns.push(column);
                }
                None => missing.push(sel.field.to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(Error::unresolved(print_all(contexts), missing));
        }
        Fields::from_columns(columns)
    }

    /// Positions of `selector`'s columns within the concatenation of
    /// `contexts`, using the same precedence as [`Fields::resolve`].
    pub fn positions_across(selector: &Fields, contexts: &[&Fields]) -> Result<Vec<usize>> {
        let total: usize = contexts.iter().map(|c| c.len()).sum();
        match selector.sentinel() {
            Some(Sentinel::All) => return Ok((0..total).collect()),
            Some(Sentinel::None) => return Ok(Vec::new()),
            Some(_) => {
                return Err(Error::SchemaConflict(format!(
                    "unable to use given selector: {selector}"
                )))
            }
            None => {}
        }

        let mut missing = Vec::new();
        let mut out = Vec::with_capacity(selector.len());
        for field in selector.iter() {
            let found = match field {
                Field::Name(_) => {
                    let mut offset = 0;
                    let mut hit = None;
                    for ctx in contexts {
                        if let Some(i) = ctx.index_of_safe(field) {
                            hit = Some(offset + i);
                            break;
                        }
                        offset += ctx.len();
                    }
                    hit
                }
                Field::Pos(p) => translate_position(*p, total),
            };
            match found {
                Some(i) => out.push(i),
                None => missing.push(field.to_string()),
            }
        }
        if missing.is_empty() {
            Ok(out)
        } else {
            Err(Error::unresolved(print_all(contexts), missing))
        }
    }

    fn find_named<'a>(contexts: &[&'a Fields], field: &Field) -> Option<&'a Column> {
        for ctx in contexts.iter().copied() {
            if !ctx.is_defined() {
                continue;
            }
            if let Some(idx) = ctx.index_of_safe(field) {
                return Some(&ctx.columns()[idx]);
            }
        }
        None
    }

    fn locate<'a>(contexts: &[&'a Fields], mut abs: usize) -> Option<&'a Column> {
        for ctx in contexts.iter().copied() {
            if !ctx.is_defined() {
                continue;
            }
            if abs < ctx.len() {
                return Some(&ctx.columns()[abs]);
            }
            abs -= ctx.len();
        }
        None
    }

    fn resolve_replace(contexts: &[&Fields]) -> Result<Fields> {
        let (incoming, declared) = match contexts {
            [incoming, declared, ..] => (*incoming, *declared),
            _ => {
                return Err(Error::SchemaConflict(
                    "replace requires incoming and declared fields".into(),
                ))
            }
        };
        if declared.is_unknown() {
            return Err(Error::SchemaConflict(
                "cannot replace fields with unknown field declaration".into(),
            ));
        }
        if incoming.is_unknown() {
            return Ok(Fields::unknown());
        }

        let positions = incoming.pos(declared)?;
        let mut columns = incoming.columns().to_vec();
        for (p, d) in positions.iter().zip(declared.columns()) {
            columns[*p].field_type = d.field_type;
        }
        Ok(Fields::defined(columns))
    }

    // ----- metadata (copy-on-write) -----

    pub fn apply_type(&self, field: impl Into<Field>, field_type: FieldType) -> Result<Fields> {
        let idx = self.index_of(field)?;
        let mut columns = self.columns().to_vec();
        columns[idx].field_type = Some(field_type);
        Ok(Fields::defined(columns))
    }

    pub fn apply_types(&self, types: &[Option<FieldType>]) -> Result<Fields> {
        if !self.is_defined() || types.len() != self.len() {
            return Err(Error::SchemaConflict(format!(
                "given types array must match fields size: {} vs {self}",
                types.len()
            )));
        }
        let columns = self
            .columns()
            .iter()
            .zip(types)
            .map(|(c, t)| Column {
                field_type: *t,
                ..c.clone()
            })
            .collect();
        Ok(Fields::defined(columns))
    }

    pub fn strip_types(&self) -> Fields {
        match &self.shape {
            Shape::Sentinel(_) => self.clone(),
            Shape::Defined(columns) => Fields::defined(
                columns
                    .iter()
                    .map(|c| Column {
                        field_type: None,
                        ..c.clone()
                    })
                    .collect(),
            ),
        }
    }

    pub fn set_comparator(
        &self,
        field: impl Into<Field>,
        comparator: Arc<dyn ValueComparator>,
    ) -> Result<Fields> {
        let idx = self.index_of(field)?;
        let mut columns = self.columns().to_vec();
        columns[idx].comparator = Some(comparator);
        Ok(Fields::defined(columns))
    }
}

impl PartialEq for Fields {
    fn eq(&self, other: &Self) -> bool {
        match (&self.shape, &other.shape) {
            (Shape::Defined(a), Shape::Defined(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.field == y.field)
            }
            (Shape::Sentinel(a), Shape::Sentinel(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Fields {}

impl Hash for Fields {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.shape {
            Shape::Defined(columns) => {
                state.write_u8(0);
                for c in columns {
                    c.field.hash(state);
                }
            }
            Shape::Sentinel(s) => {
                state.write_u8(1);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape {
            Shape::Sentinel(s) => write!(f, "{s}"),
            Shape::Defined(columns) => {
                f.write_str("[")?;
                for (i, c) in columns.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", c.field)?;
                    if let Some(t) = &c.field_type {
                        write!(f, ":{t}")?;
                    }
                }
                f.write_str("]")
            }
        }
    }
}

impl fmt::Debug for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fields({self})")
    }
}

impl From<Column> for Fields {
    fn from(column: Column) -> Self {
        Fields::defined(vec![column])
    }
}

impl Default for Fields {
    fn default() -> Self {
        Fields::unknown()
    }
}
