//! Immutable description of a computation over time series.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::{DataId, FuncId};
use crate::error::CoreError;

pub type ArgName = String;

/// Shape of one operator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputType {
    #[serde(rename = "dataId")]
    DataId,
    #[serde(rename = "list")]
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Input {
    #[serde(rename = "type")]
    pub kind: InputType,
    pub ids: Vec<DataId>,
}

impl Input {
    pub fn single(id: impl Into<DataId>) -> Self {
        Self { kind: InputType::DataId, ids: vec![id.into()] }
    }

    pub fn list(ids: Vec<DataId>) -> Self {
        Self { kind: InputType::List, ids }
    }
}

impl From<DataId> for Input {
    fn from(id: DataId) -> Self {
        Input::single(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Argument {
    pub value: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Argument {
    pub fn new(value: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { value: value.into(), kind: kind.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expression {
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub outputs: Vec<DataId>,
    pub func_id: FuncId,
    #[serde(default)]
    pub dataflow: String,
    #[serde(default)]
    pub arguments: BTreeMap<ArgName, Argument>,
}

/// Identity of a computation: everything but the outputs.
///
/// Outputs are minted the first time an expression is stored, so two
/// requests for the same computation differ only in what they propose as
/// outputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpressionKey {
    pub inputs: Vec<Input>,
    pub func_id: FuncId,
    pub dataflow: String,
    pub arguments: BTreeMap<ArgName, Argument>,
}

impl Expression {
    pub fn new(inputs: Vec<Input>, func_id: impl Into<FuncId>) -> Self {
        Self {
            inputs,
            outputs: Vec::new(),
            func_id: func_id.into(),
            dataflow: String::new(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn make_root(id: impl Into<DataId>) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: vec![id.into()],
            func_id: FuncId::noop(),
            dataflow: String::new(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn with_dataflow(mut self, dataflow: impl Into<String>) -> Self {
        self.dataflow = dataflow.into();
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, argument: Argument) -> Self {
        self.arguments.insert(name.into(), argument);
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<DataId>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn is_root(&self) -> bool {
        self.inputs.is_empty()
    }

    /// All referenced input ids, flattened in order.
    pub fn input_ids(&self) -> impl Iterator<Item = &DataId> {
        self.inputs.iter().flat_map(|input| input.ids.iter())
    }

    pub fn consumes(&self, id: &DataId) -> bool {
        self.input_ids().any(|input| input == id)
    }

    pub fn key(&self) -> ExpressionKey {
        ExpressionKey {
            inputs: self.inputs.clone(),
            func_id: self.func_id.clone(),
            dataflow: self.dataflow.clone(),
            arguments: self.arguments.clone(),
        }
    }

    /// Same computation, ignoring outputs.
    pub fn same_computation(&self, other: &Expression) -> bool {
        self.inputs == other.inputs
            && self.func_id == other.func_id
            && self.dataflow == other.dataflow
            && self.arguments == other.arguments
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.is_root() {
            if self.outputs.len() != 1 {
                return Err(CoreError::InvalidExpression(format!(
                    "root expression must have exactly one output, got {}",
                    self.outputs.len()
                )));
            }
            return Ok(());
        }
        for input in &self.inputs {
            match input.kind {
                InputType::DataId if input.ids.len() != 1 => {
                    return Err(CoreError::InvalidExpression(format!(
                        "single-id input must reference exactly one id, got {}",
                        input.ids.len()
                    )));
                }
                InputType::List if input.ids.is_empty() => {
                    return Err(CoreError::InvalidExpression(
                        "list input must reference at least one id".to_string(),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(outputs: Vec<DataId>) -> Expression {
        Expression::new(vec![Input::single("d1"), Input::list(vec!["d2".into(), "d3".into()])], "f1")
            .with_argument("window", Argument::new("10", "int"))
            .with_outputs(outputs)
    }

    #[test]
    fn root_has_no_inputs() {
        let root = Expression::make_root("d1");
        assert!(root.is_root());
        assert!(root.func_id.is_noop());
        assert!(root.validate().is_ok());
        assert!(!sample(vec![]).is_root());
    }

    #[test]
    fn equality_ignores_outputs() {
        let a = sample(vec!["p1".into()]);
        let b = sample(vec!["p2".into()]);
        assert_ne!(a, b);
        assert!(a.same_computation(&b));
        assert_eq!(a.key(), b.key());

        let c = sample(vec![]).with_dataflow("x + 1");
        assert!(!a.same_computation(&c));
    }

    #[test]
    fn flattens_inputs_in_order() {
        let e = sample(vec![]);
        let ids: Vec<&str> = e.input_ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2", "d3"]);
        assert!(e.consumes(&"d3".into()));
        assert!(!e.consumes(&"d4".into()));
    }

    #[test]
    fn validate_rejects_malformed_inputs() {
        let bad_root = Expression::make_root("d1").with_outputs(vec![]);
        assert!(bad_root.validate().is_err());

        let bad_single = Expression::new(
            vec![Input { kind: InputType::DataId, ids: vec!["a".into(), "b".into()] }],
            "f",
        );
        assert!(bad_single.validate().is_err());

        let empty_list = Expression::new(vec![Input::list(vec![])], "f");
        assert!(empty_list.validate().is_err());
    }

    #[test]
    fn deserializes_wire_shape() {
        let json = r#"{
            "inputs": [{"type": "dataId", "ids": ["d1"]}, {"type": "list", "ids": ["d2", "d3"]}],
            "outputs": [],
            "funcId": "f1",
            "dataflow": "",
            "arguments": {"arg1": {"value": "10", "type": "float"}}
        }"#;
        let e: Expression = serde_json::from_str(json).unwrap();
        assert_eq!(e.inputs.len(), 2);
        assert_eq!(e.inputs[1].kind, InputType::List);
        assert_eq!(e.arguments["arg1"].kind, "float");
    }
}
