//! Flat result records and the scalar values they hold.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single value in a result record or a parameter grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Interpret captured text as an integer if possible, then as a float, and otherwise keep it
    /// as text.
    pub fn parse(text: &str) -> Scalar {
        if let Ok(i) = text.parse::<i64>() {
            Scalar::Int(i)
        } else if let Ok(f) = text.parse::<f64>() {
            Scalar::Float(f)
        } else {
            Scalar::Text(text.to_owned())
        }
    }

    /// The value as a number. Text is parsed, so values kept verbatim still read as numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Text(s) => s.parse().ok(),
        }
    }

    /// Returns the value as a `u64` if it is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Scalar::Int(i) if *i >= 0 => Some(*i as u64),
            Scalar::Int(_) | Scalar::Float(_) => None,
            Scalar::Text(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<usize> for Scalar {
    fn from(i: usize) -> Self {
        Scalar::Int(i as i64)
    }
}

impl From<u64> for Scalar {
    fn from(i: u64) -> Self {
        Scalar::Int(i as i64)
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Scalar::Float(x)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

/// An ordered mapping from field name to value. Inserting an existing field replaces its value
/// in place, so the column order is the order in which fields first appeared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Scalar)>,
}

impl Record {
    pub fn new() -> Self {
        Record { fields: Vec::new() }
    }

    pub fn insert<K: Into<String>, V: Into<Scalar>>(&mut self, name: K, value: V) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, old)) => *old = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Builder-style `insert`.
    pub fn with<K: Into<String>, V: Into<Scalar>>(mut self, name: K, value: V) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Insert every field of `other`, replacing fields this record already has.
    pub fn merge(&mut self, other: &Record) {
        for (name, value) in other.iter() {
            self.insert(name, value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}
