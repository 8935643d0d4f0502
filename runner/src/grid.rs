//! Parameter grids: the Cartesian product of named candidate lists.

use std::fmt;

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};

use crate::record::{Record, Scalar};

/// A mapping from parameter name to an ordered list of candidate values. The declaration order is
/// kept: when expanding, the last-declared parameter varies fastest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterGrid {
    params: Vec<(String, Vec<Scalar>)>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        ParameterGrid { params: Vec::new() }
    }

    /// Declare a parameter. Re-declaring a name replaces its candidates but keeps its position.
    pub fn param<K, I, V>(mut self, name: K, values: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<Scalar>,
    {
        let name = name.into();
        let values: Vec<Scalar> = values.into_iter().map(Into::into).collect();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some((_, old)) => *old = values,
            None => self.params.push((name, values)),
        }
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(n, _)| n.as_str())
    }

    /// The number of combinations. Zero if any parameter has no candidates.
    pub fn len(&self) -> usize {
        if self.params.is_empty() {
            0
        } else {
            self.params.iter().map(|(_, v)| v.len()).product()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazily expand the grid. Each call starts from the first combination.
    pub fn iter(&self) -> Combinations<'_> {
        Combinations {
            grid: self,
            indices: vec![0; self.params.len()],
            done: self.is_empty(),
        }
    }
}

impl<'a> IntoIterator for &'a ParameterGrid {
    type Item = Params;
    type IntoIter = Combinations<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Row-major odometer over a `ParameterGrid`.
#[derive(Debug, Clone)]
pub struct Combinations<'a> {
    grid: &'a ParameterGrid,
    indices: Vec<usize>,
    done: bool,
}

impl Iterator for Combinations<'_> {
    type Item = Params;

    fn next(&mut self) -> Option<Params> {
        if self.done {
            return None;
        }

        let mut record = Record::new();
        for ((name, values), &i) in self.grid.params.iter().zip(self.indices.iter()) {
            record.insert(name.as_str(), values[i].clone());
        }

        // Advance, carrying from the last parameter towards the first.
        self.done = true;
        for (pos, (_, values)) in self.grid.params.iter().enumerate().rev() {
            self.indices[pos] += 1;
            if self.indices[pos] < values.len() {
                self.done = false;
                break;
            }
            self.indices[pos] = 0;
        }

        Some(Params(record))
    }
}

/// One combination of a `ParameterGrid`.
#[derive(Debug, Clone, PartialEq)]
pub struct Params(Record);

impl Params {
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.0.get(name)
    }

    /// Get a non-negative integer parameter, failing with a useful message otherwise.
    pub fn get_u64(&self, name: &str) -> Result<u64, failure::Error> {
        match self.0.get(name) {
            Some(value) => value.as_u64().ok_or_else(|| {
                failure::format_err!("Parameter `{}` must be a non-negative integer", name)
            }),
            None => Err(failure::format_err!("Missing parameter `{}`", name)),
        }
    }

    pub fn as_record(&self) -> &Record {
        &self.0
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<'de> Deserialize<'de> for ParameterGrid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GridVisitor;

        impl<'de> Visitor<'de> for GridVisitor {
            type Value = ParameterGrid;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a map from parameter name to a list of values")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<ParameterGrid, M::Error> {
                let mut grid = ParameterGrid::new();
                while let Some((name, values)) = map.next_entry::<String, Vec<Scalar>>()? {
                    grid = grid.param(name, values);
                }
                Ok(grid)
            }
        }

        deserializer.deserialize_map(GridVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_size() {
        let grid = ParameterGrid::new()
            .param("a", vec![1i64, 2, 3])
            .param("b", vec!["x", "y"])
            .param("c", vec![0.5]);

        assert_eq!(grid.len(), 6);
        assert_eq!(grid.iter().count(), 6);
    }

    #[test]
    fn last_declared_varies_fastest() {
        let grid = ParameterGrid::new()
            .param("ratio", vec![1i64, 10])
            .param("left_size", vec![100i64, 200]);

        let combos: Vec<(u64, u64)> = grid
            .iter()
            .map(|p| (p.get_u64("ratio").unwrap(), p.get_u64("left_size").unwrap()))
            .collect();

        assert_eq!(combos, vec![(1, 100), (1, 200), (10, 100), (10, 200)]);
    }

    #[test]
    fn empty_dimension_yields_nothing() {
        let grid = ParameterGrid::new()
            .param("a", vec![1i64, 2])
            .param("b", Vec::<i64>::new());

        assert!(grid.is_empty());
        assert_eq!(grid.iter().next(), None);
        assert_eq!(ParameterGrid::new().iter().count(), 0);
    }

    #[test]
    fn restartable() {
        let grid = ParameterGrid::new().param("a", vec![1i64, 2]);
        assert_eq!(grid.iter().count(), 2);
        assert_eq!(grid.iter().count(), 2);
    }

    #[test]
    fn deserialize_keeps_declaration_order() {
        let grid: ParameterGrid =
            serde_json::from_str(r#"{"zeta": [1, 2], "alpha": ["t"], "mid": [0.25]}"#).unwrap();

        assert_eq!(grid.names().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
        let first = grid.iter().next().unwrap();
        assert_eq!(first.get("alpha"), Some(&Scalar::Text("t".into())));
        assert_eq!(first.get("mid"), Some(&Scalar::Float(0.25)));
    }
}
