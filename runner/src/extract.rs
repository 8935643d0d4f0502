//! Turning a process's telemetry lines into one flat record.
//!
//! A `Schema` is an ordered list of rules. Each rule is a regular expression with exactly one
//! named capture group; the group name is the field name. Every output line is tested against
//! every rule, and each match updates its field according to the rule's `Reduction`. When the
//! output closes, `Extractor::finish` produces a `Record` holding every field that matched at
//! least once, in schema order. Fields that never matched are absent.

use regex::Regex;

use crate::error::{ExtractionError, SchemaError};
use crate::record::{Record, Scalar};

/// How repeated matches of one field are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Later matches overwrite earlier ones.
    Last,
    /// Running total. Integer captures stay integers until a fractional value shows up.
    Sum,
    /// Arithmetic mean of all matches.
    Mean,
}

impl Reduction {
    fn name(self) -> &'static str {
        match self {
            Reduction::Last => "last",
            Reduction::Sum => "sum",
            Reduction::Mean => "mean",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    name: String,
    regex: Regex,
    reduction: Reduction,
}

impl FieldRule {
    pub fn new(pattern: &str, reduction: Reduction) -> Result<Self, SchemaError> {
        let regex = Regex::new(pattern).map_err(|e| SchemaError::BadPattern {
            pattern: pattern.into(),
            cause: e.to_string(),
        })?;

        let names: Vec<&str> = regex.capture_names().filter_map(|n| n).collect();
        if names.len() != 1 {
            return Err(SchemaError::CaptureGroups {
                pattern: pattern.into(),
                found: names.len(),
            });
        }
        let name = names[0].to_owned();

        Ok(FieldRule {
            name,
            regex,
            reduction,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    fn capture<'l>(&self, line: &'l str) -> Option<&'l str> {
        self.regex
            .captures(line)
            .and_then(|caps| caps.name(&self.name))
            .map(|m| m.as_str())
    }
}

/// A validated, ordered set of field rules.
#[derive(Debug, Clone)]
pub struct Schema {
    rules: Vec<FieldRule>,
}

impl Schema {
    pub fn new(rules: Vec<FieldRule>) -> Result<Self, SchemaError> {
        for (i, rule) in rules.iter().enumerate() {
            if rules[..i].iter().any(|r| r.name == rule.name) {
                return Err(SchemaError::Duplicate {
                    field: rule.name.clone(),
                });
            }
        }

        Ok(Schema { rules })
    }

    /// Build a schema from `(pattern, reduction)` pairs.
    pub fn parse(rules: &[(&str, Reduction)]) -> Result<Self, SchemaError> {
        let rules = rules
            .iter()
            .map(|&(pattern, reduction)| FieldRule::new(pattern, reduction))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(rules)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(FieldRule::name)
    }

    pub fn extractor(&self) -> Extractor<'_> {
        Extractor::new(self)
    }
}

#[derive(Debug, Clone)]
enum Acc {
    Last(Scalar),
    IntSum(i64),
    FloatSum(f64),
    Mean { sum: f64, count: u64 },
}

/// Per-process reduction state for one `Schema`.
#[derive(Debug)]
pub struct Extractor<'s> {
    schema: &'s Schema,
    state: Vec<Option<Acc>>,
    error: Option<ExtractionError>,
}

impl<'s> Extractor<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Extractor {
            schema,
            state: vec![None; schema.rules.len()],
            error: None,
        }
    }

    /// Apply every rule to `line`.
    ///
    /// A value that cannot be reduced is remembered and reported by `finish`; the offending
    /// field stops updating but the others keep going, so the output keeps being drained.
    pub fn feed(&mut self, line: &str) {
        for (rule, acc) in self.schema.rules.iter().zip(self.state.iter_mut()) {
            let text = match rule.capture(line) {
                Some(text) => text,
                None => continue,
            };

            if let Err(e) = Self::update(rule, acc, text) {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
    }

    fn update(rule: &FieldRule, acc: &mut Option<Acc>, text: &str) -> Result<(), ExtractionError> {
        let value = Scalar::parse(text);
        let non_numeric = || ExtractionError {
            field: rule.name.clone(),
            value: text.to_owned(),
            reduction: rule.reduction.name(),
        };

        let next = match (rule.reduction, acc.take(), value) {
            // Kept exactly as printed.
            (Reduction::Last, _, _) => Acc::Last(Scalar::Text(text.to_owned())),

            (Reduction::Sum, _, Scalar::Text(_)) | (Reduction::Mean, _, Scalar::Text(_)) => {
                return Err(non_numeric());
            }

            (Reduction::Sum, None, Scalar::Int(i)) => Acc::IntSum(i),
            (Reduction::Sum, None, Scalar::Float(x)) => Acc::FloatSum(x),
            (Reduction::Sum, Some(Acc::IntSum(total)), Scalar::Int(i)) => {
                match total.checked_add(i) {
                    Some(total) => Acc::IntSum(total),
                    None => Acc::FloatSum(total as f64 + i as f64),
                }
            }
            (Reduction::Sum, Some(Acc::IntSum(total)), Scalar::Float(x)) => {
                Acc::FloatSum(total as f64 + x)
            }
            (Reduction::Sum, Some(Acc::FloatSum(total)), value) => {
                Acc::FloatSum(total + value.as_f64().unwrap_or(0.0))
            }

            (Reduction::Mean, None, value) => Acc::Mean {
                sum: value.as_f64().unwrap_or(0.0),
                count: 1,
            },
            (Reduction::Mean, Some(Acc::Mean { sum, count }), value) => Acc::Mean {
                sum: sum + value.as_f64().unwrap_or(0.0),
                count: count + 1,
            },

            (reduction, Some(other), _) => {
                unreachable!("{:?} state {:?} for field {}", reduction, other, rule.name)
            }
        };

        *acc = Some(next);
        Ok(())
    }

    /// Produce the record for everything fed so far.
    pub fn finish(self) -> Result<Record, ExtractionError> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let mut record = Record::new();
        for (rule, acc) in self.schema.rules.iter().zip(self.state.into_iter()) {
            let value = match acc {
                None => continue,
                Some(Acc::Last(value)) => value,
                Some(Acc::IntSum(total)) => Scalar::Int(total),
                Some(Acc::FloatSum(total)) => Scalar::Float(total),
                Some(Acc::Mean { sum, count }) => Scalar::Float(sum / count as f64),
            };
            record.insert(rule.name.as_str(), value);
        }

        Ok(record)
    }
}
