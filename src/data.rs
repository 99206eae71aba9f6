//! Two-group observations and their Stan encoding
//!
//! Inputs arrive either as two named groups or as an ordered pair. Both
//! are normalized to [`TwoGroupData`], which flattens to the `{N, j, y}`
//! record every template reads: `y` is the concatenation of both groups
//! and `j[n]` is 1 for first-group observations and 2 for the rest.

use crate::error::{AbayesError, Result};
use crate::templates::Family;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

/// Accepted input shapes for [`crate::ABayes::fit`]
#[derive(Debug, Clone, PartialEq)]
pub enum GroupedInput {
    /// Two labelled groups, first label is group 1
    Named {
        first: (String, Vec<f64>),
        second: (String, Vec<f64>),
    },
    /// Unlabelled groups in order
    Pair(Vec<f64>, Vec<f64>),
}

impl GroupedInput {
    pub fn named(
        first_label: impl Into<String>,
        first: impl IntoIterator<Item = impl Into<f64>>,
        second_label: impl Into<String>,
        second: impl IntoIterator<Item = impl Into<f64>>,
    ) -> Self {
        GroupedInput::Named {
            first: (first_label.into(), collect_f64(first)),
            second: (second_label.into(), collect_f64(second)),
        }
    }

    pub fn pair(
        first: impl IntoIterator<Item = impl Into<f64>>,
        second: impl IntoIterator<Item = impl Into<f64>>,
    ) -> Self {
        GroupedInput::Pair(collect_f64(first), collect_f64(second))
    }

    /// Parse `{"a": [...], "b": [...]}` or `[[...], [...]]`.
    ///
    /// Booleans are read as 0/1. Member order of an object is preserved.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                if map.len() != 2 {
                    return Err(AbayesError::InvalidData(format!(
                        "expected exactly two groups, found {}",
                        map.len()
                    )));
                }
                let mut groups = map
                    .iter()
                    .map(|(name, values)| -> Result<(String, Vec<f64>)> {
                        Ok((name.clone(), json_vector(name, values)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let second = groups.pop();
                let first = groups.pop();
                match (first, second) {
                    (Some(first), Some(second)) => Ok(GroupedInput::Named { first, second }),
                    _ => Err(AbayesError::InvalidData(
                        "expected exactly two groups".to_string(),
                    )),
                }
            }
            Value::Array(items) => match items.as_slice() {
                [a, b] => Ok(GroupedInput::Pair(
                    json_vector("group 1", a)?,
                    json_vector("group 2", b)?,
                )),
                _ => Err(AbayesError::InvalidData(format!(
                    "expected a pair of groups, found {} elements",
                    items.len()
                ))),
            },
            other => Err(AbayesError::InvalidData(format!(
                "data must be an object of two groups or a pair of arrays, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Read a JSON data file, see [`GroupedInput::from_json`].
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;
        Self::from_json(&value)
    }

    /// Normalize to a single labelled structure.
    pub fn normalize(self) -> Result<TwoGroupData> {
        let (labels, first, second) = match self {
            GroupedInput::Named { first, second } => ([first.0, second.0], first.1, second.1),
            GroupedInput::Pair(first, second) => {
                (["1".to_string(), "2".to_string()], first, second)
            }
        };

        for (label, values) in labels.iter().zip([&first, &second]) {
            if values.is_empty() {
                return Err(AbayesError::InvalidData(format!(
                    "group {:?} has no observations",
                    label
                )));
            }
            if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
                return Err(AbayesError::InvalidData(format!(
                    "group {:?} contains non-finite value {}",
                    label, bad
                )));
            }
        }

        Ok(TwoGroupData {
            labels,
            first,
            second,
        })
    }
}

impl From<(Vec<f64>, Vec<f64>)> for GroupedInput {
    fn from((first, second): (Vec<f64>, Vec<f64>)) -> Self {
        GroupedInput::Pair(first, second)
    }
}

impl From<[Vec<f64>; 2]> for GroupedInput {
    fn from([first, second]: [Vec<f64>; 2]) -> Self {
        GroupedInput::Pair(first, second)
    }
}

impl From<(Vec<bool>, Vec<bool>)> for GroupedInput {
    fn from((first, second): (Vec<bool>, Vec<bool>)) -> Self {
        GroupedInput::pair(
            first.into_iter().map(u8::from),
            second.into_iter().map(u8::from),
        )
    }
}

/// Two groups of observations after validation
#[derive(Debug, Clone, PartialEq)]
pub struct TwoGroupData {
    pub labels: [String; 2],
    pub first: Vec<f64>,
    pub second: Vec<f64>,
}

impl TwoGroupData {
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Group index per observation, aligned with [`TwoGroupData::observations`].
    pub fn group_index(&self) -> Vec<u8> {
        let mut j = vec![1u8; self.first.len()];
        j.resize(self.len(), 2);
        j
    }

    pub fn observations(&self) -> Vec<f64> {
        let mut y = Vec::with_capacity(self.len());
        y.extend_from_slice(&self.first);
        y.extend_from_slice(&self.second);
        y
    }

    /// Build the `{N, j, y}` record for a likelihood family.
    pub fn to_stan_data(&self, family: Family) -> Result<StanData> {
        let y = self.observations();
        let y = if family.is_discrete() {
            let mut ints = Vec::with_capacity(y.len());
            for v in y {
                if v.fract() != 0.0 || v < 0.0 {
                    return Err(AbayesError::InvalidData(format!(
                        "{:?} likelihood needs non-negative integer observations, got {}",
                        family, v
                    )));
                }
                if family == Family::Binary && v > 1.0 {
                    return Err(AbayesError::InvalidData(format!(
                        "binary observations must be 0 or 1, got {}",
                        v
                    )));
                }
                ints.push(json!(v as i64));
            }
            ints
        } else {
            y.into_iter().map(|v| json!(v)).collect()
        };

        Ok(StanData {
            n: self.len(),
            j: self.group_index(),
            y,
        })
    }
}

/// Stan data record, serialized as cmdstan JSON input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StanData {
    #[serde(rename = "N")]
    pub n: usize,
    pub j: Vec<u8>,
    pub y: Vec<Value>,
}

impl StanData {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

fn collect_f64(values: impl IntoIterator<Item = impl Into<f64>>) -> Vec<f64> {
    values.into_iter().map(Into::into).collect()
}

fn json_vector(name: &str, value: &Value) -> Result<Vec<f64>> {
    let items = value.as_array().ok_or_else(|| {
        AbayesError::InvalidData(format!(
            "group {:?} must be an array, got {}",
            name,
            json_kind(value)
        ))
    })?;

    items
        .iter()
        .map(|item| match item {
            Value::Number(n) => n.as_f64().ok_or_else(|| {
                AbayesError::InvalidData(format!("group {:?}: {} is out of range", name, n))
            }),
            Value::Bool(b) => Ok(f64::from(u8::from(*b))),
            other => Err(AbayesError::InvalidData(format!(
                "group {:?}: expected a number, got {}",
                name,
                json_kind(other)
            ))),
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_bernoulli_record() {
        let value = json!({"control": [0, 1, 1, 0, 1], "treatment": [1, 1, 1, 0, 1]});
        let data = GroupedInput::from_json(&value).unwrap().normalize().unwrap();
        assert_eq!(data.labels, ["control".to_string(), "treatment".to_string()]);

        let stan = data.to_stan_data(Family::Binary).unwrap();
        assert_eq!(stan.n, 10);
        assert_eq!(stan.j, vec![1, 1, 1, 1, 1, 2, 2, 2, 2, 2]);

        let encoded = serde_json::to_value(&stan).unwrap();
        assert_eq!(encoded["N"], json!(10));
        assert_eq!(encoded["y"], json!([0, 1, 1, 0, 1, 1, 1, 1, 0, 1]));
    }

    #[test]
    fn object_order_is_preserved() {
        let value = json!({"treatment": [2.0], "control": [1.0]});
        let data = GroupedInput::from_json(&value).unwrap().normalize().unwrap();
        assert_eq!(data.labels[0], "treatment");
        assert_eq!(data.observations(), vec![2.0, 1.0]);
    }

    #[test]
    fn unequal_groups_align() {
        let data = GroupedInput::pair([1.5, 2.5, 3.5], [4.5, 5.5])
            .normalize()
            .unwrap();
        let y = data.observations();
        let j = data.group_index();
        assert_eq!(y.len(), 5);
        assert_eq!(j, vec![1, 1, 1, 2, 2]);
        assert_eq!(y[3], 4.5);
    }

    #[test]
    fn booleans_become_indicators() {
        let input: GroupedInput = (vec![true, false], vec![false, false, true]).into();
        let stan = input
            .normalize()
            .unwrap()
            .to_stan_data(Family::Binary)
            .unwrap();
        assert_eq!(stan.y, vec![json!(1), json!(0), json!(0), json!(0), json!(1)]);
    }

    #[test]
    fn rejects_non_collections() {
        for value in [json!(3), json!("control"), json!(null), json!([1, 2, 3])] {
            assert!(matches!(
                GroupedInput::from_json(&value),
                Err(AbayesError::InvalidData(_))
            ));
        }
        let three = json!({"a": [1], "b": [2], "c": [3]});
        assert!(GroupedInput::from_json(&three).is_err());
        let strings = json!({"a": ["x"], "b": [2]});
        assert!(GroupedInput::from_json(&strings).is_err());
    }

    #[test]
    fn rejects_empty_group() {
        let err = GroupedInput::pair(Vec::<f64>::new(), [1.0])
            .normalize()
            .unwrap_err();
        assert!(err.to_string().contains("no observations"));
    }

    #[test]
    fn discrete_families_need_integers() {
        let data = GroupedInput::pair([0.5], [1.0]).normalize().unwrap();
        assert!(data.to_stan_data(Family::Binary).is_err());
        assert!(data.to_stan_data(Family::Count).is_err());
        assert!(data.to_stan_data(Family::Continuous).is_ok());

        let counts = GroupedInput::pair([3.0], [7.0]).normalize().unwrap();
        assert!(counts.to_stan_data(Family::Binary).is_err());
        assert_eq!(
            counts.to_stan_data(Family::Count).unwrap().y,
            vec![json!(3), json!(7)]
        );
    }
}
