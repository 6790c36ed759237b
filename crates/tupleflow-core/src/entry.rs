//! Named access over a tuple.
//!
//! `TupleEntry` borrows a `Fields` and a `Tuple` and resolves names and
//! positions against the fields. `TupleEntryMut` additionally writes, coercing
//! each value through the declared type of its column.

use crate::error::{Error, Result};
use crate::fields::{Field, Fields};
use crate::tuple::Tuple;
use crate::types::{DataType, Scalar};

#[derive(Debug, Clone, Copy)]
pub struct TupleEntry<'a> {
    fields: &'a Fields,
    tuple: &'a Tuple,
}

impl<'a> TupleEntry<'a> {
    pub fn new(fields: &'a Fields, tuple: &'a Tuple) -> Self {
        Self { fields, tuple }
    }

    pub fn fields(&self) -> &'a Fields {
        self.fields
    }

    pub fn tuple(&self) -> &'a Tuple {
        self.tuple
    }

    pub fn len(&self) -> usize {
        self.tuple.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuple.is_empty()
    }

    fn position(&self, field: &Field) -> Result<usize> {
        // Unknown fields: positional access straight into the tuple.
        if self.fields.is_unknown() {
            if let Field::Pos(p) = field {
                return crate::fields::translate_position(*p, self.tuple.len())
                    .ok_or_else(|| Error::unresolved(self.fields, vec![field.to_string()]));
            }
        }
        self.fields
            .index_of_safe(field)
            .filter(|i| *i < self.tuple.len())
            .ok_or_else(|| Error::unresolved(self.fields, vec![field.to_string()]))
    }

    pub fn get(&self, field: impl Into<Field>) -> Result<&'a Scalar> {
        let idx = self.position(&field.into())?;
        self.tuple
            .get(idx)
            .ok_or_else(|| Error::Invariant(format!("tuple shorter than its fields: {}", self.fields)))
    }

    /// Value coerced to `target`.
    pub fn get_as(&self, field: impl Into<Field>, target: DataType) -> Result<Scalar> {
        self.get(field)?.coerce_to(target)
    }

    pub fn get_i64(&self, field: impl Into<Field>) -> Result<Option<i64>> {
        Ok(self.get_as(field, DataType::Int64)?.as_i64())
    }

    pub fn get_f64(&self, field: impl Into<Field>) -> Result<Option<f64>> {
        Ok(self.get_as(field, DataType::Float64)?.as_f64())
    }

    pub fn get_str(&self, field: impl Into<Field>) -> Result<Option<&'a str>> {
        Ok(self.get(field)?.as_str())
    }

    pub fn get_bool(&self, field: impl Into<Field>) -> Result<Option<bool>> {
        match self.get_as(field, DataType::Boolean)? {
            Scalar::Bool(b) => Ok(Some(b)),
            _ => Ok(None),
        }
    }

    /// New tuple holding the columns named by `selector`.
    pub fn select_tuple(&self, selector: &Fields) -> Result<Tuple> {
        if selector.is_all() {
            return Ok(Tuple::new(self.tuple.values().to_vec()));
        }
        let positions = self.fields.pos(selector)?;
        self.tuple.select(&positions)
    }
}

#[derive(Debug)]
pub struct TupleEntryMut<'a> {
    fields: &'a Fields,
    tuple: &'a mut Tuple,
}

impl<'a> TupleEntryMut<'a> {
    pub fn new(fields: &'a Fields, tuple: &'a mut Tuple) -> Self {
        Self { fields, tuple }
    }

    pub fn as_entry(&self) -> TupleEntry<'_> {
        TupleEntry::new(self.fields, self.tuple)
    }

    /// Write `value` into `field`, coercing through the column's declared type.
    pub fn set(&mut self, field: impl Into<Field>, value: impl Into<Scalar>) -> Result<()> {
        let field = field.into();
        let idx = self
            .fields
            .index_of_safe(&field)
            .ok_or_else(|| Error::unresolved(self.fields, vec![field.to_string()]))?;
        let value = value.into();
        let value = match self.fields.field_type(idx) {
            Some(t) => t.coerce(&value)?,
            None => value,
        };
        self.tuple.set(idx, value)
    }

    /// Replace every value, coercing through the declared types.
    pub fn set_tuple(&mut self, values: &Tuple) -> Result<()> {
        if values.len() != self.tuple.len() {
            return Err(Error::Invariant(format!(
                "cannot set {} values into {}",
                values.len(),
                self.fields
            )));
        }
        let coerced = values.coerce(self.fields)?;
        let positions: Vec<usize> = (0..coerced.len()).collect();
        self.tuple.set_all(&positions, &coerced)
    }
}
