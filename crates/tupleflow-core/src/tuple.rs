//! `Tuple`: an ordered vector of untyped values.
//!
//! Tuples handed downstream are frozen; any write to a frozen tuple fails
//! with `ImmutableRecordWrite`. Tuples a node builds itself stay mutable until
//! it hands them off.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fields::{translate_position, Fields};
use crate::types::Scalar;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tuple {
    values: Vec<Scalar>,
    #[serde(default)]
    frozen: bool,
}

impl Tuple {
    pub fn new(values: Vec<Scalar>) -> Self {
        Self {
            values,
            frozen: false,
        }
    }

    /// Tuple of `n` nulls.
    pub fn nulls(n: usize) -> Self {
        Self::new(vec![Scalar::Null; n])
    }

    pub fn of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Scalar>,
    {
        Self::new(values.into_iter().map(Into::into).collect())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Scalar> {
        self.values
    }

    pub fn get(&self, i: usize) -> Option<&Scalar> {
        self.values.get(i)
    }

    /// Positional access; negative positions count from the end.
    pub fn get_pos(&self, pos: i32) -> Option<&Scalar> {
        translate_position(pos, self.len()).and_then(|i| self.values.get(i))
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn check_mutable(&self) -> Result<()> {
        if self.frozen {
            Err(Error::ImmutableRecordWrite)
        } else {
            Ok(())
        }
    }

    pub fn set(&mut self, i: usize, value: impl Into<Scalar>) -> Result<()> {
        self.check_mutable()?;
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(i)
            .ok_or_else(|| Error::Invariant(format!("position {i} out of range for tuple of size {len}")))?;
        *slot = value.into();
        Ok(())
    }

    /// Give an empty mutable tuple its first value. A non-empty tuple has a
    /// fixed length; rebuild it or `clear` it first.
    pub fn add(&mut self, value: impl Into<Scalar>) -> Result<()> {
        self.check_mutable()?;
        if !self.values.is_empty() {
            return Err(Error::Invariant(format!(
                "cannot grow a tuple of size {}",
                self.values.len()
            )));
        }
        self.values.push(value.into());
        Ok(())
    }

    /// Overwrite `positions` with the values of `from`, in order.
    pub fn set_all(&mut self, positions: &[usize], from: &Tuple) -> Result<()> {
        self.check_mutable()?;
        if positions.len() != from.len() {
            return Err(Error::Invariant(format!(
                "cannot set {} positions from a tuple of size {}",
                positions.len(),
                from.len()
            )));
        }
        for (p, v) in positions.iter().zip(from.values.iter()) {
            self.set(*p, v.clone())?;
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.check_mutable()?;
        self.values.clear();
        Ok(())
    }

    /// New mutable tuple holding the values at `positions`.
    pub fn select(&self, positions: &[usize]) -> Result<Tuple> {
        positions
            .iter()
            .map(|p| {
                self.values.get(*p).cloned().ok_or_else(|| {
                    Error::Invariant(format!(
                        "position {p} out of range for tuple of size {}",
                        self.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Tuple::new)
    }

    /// New mutable tuple: `self` followed by every tuple in `others`.
    pub fn append(&self, others: &[&Tuple]) -> Tuple {
        let mut values = self.values.clone();
        for t in others {
            values.extend(t.values.iter().cloned());
        }
        Tuple::new(values)
    }

    /// Coerce each value through the declared type of the matching column.
    /// Untyped columns pass through unchanged.
    pub fn coerce(&self, fields: &Fields) -> Result<Tuple> {
        if !fields.has_types() {
            return Ok(Tuple::new(self.values.clone()));
        }
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| match fields.field_type(i) {
                Some(t) => t.coerce(v),
                None => Ok(v.clone()),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Tuple::new(values))
    }

    /// Rough in-memory footprint, used for budget accounting.
    pub fn estimated_bytes(&self) -> usize {
        self.values
            .iter()
            .map(|v| match v {
                Scalar::Str(s) => 24 + s.len(),
                Scalar::Bin(b) => 24 + b.len(),
                _ => 16,
            })
            .sum::<usize>()
            + 32
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl FromIterator<Scalar> for Tuple {
    fn from_iter<T: IntoIterator<Item = Scalar>>(iter: T) -> Self {
        Tuple::new(iter.into_iter().collect())
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str("]")
    }
}
