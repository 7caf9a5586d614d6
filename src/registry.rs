use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::{ValueType, Variant};

/// A host variable a script may read or assign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDef {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

/// One parameter of a host function. Parameters with a default may be omitted
/// by callers, but only from the end of the argument list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDef {
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Variant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDef {
    pub name: String,
    #[serde(rename = "returns")]
    pub return_type: ValueType,
    #[serde(default)]
    pub params: Vec<ParamDef>,
    #[serde(default)]
    pub awaitable: bool,
}

impl FuncDef {
    /// Number of leading parameters a call must always supply.
    pub fn required_arity(&self) -> usize {
        self.params
            .iter()
            .rposition(|param| param.default.is_none())
            .map(|idx| idx + 1)
            .unwrap_or(0)
    }
    pub fn max_arity(&self) -> usize {
        self.params.len()
    }
}

/// Snapshot of everything the host exposes to scripts, handed to the compiler
/// before it type-checks a script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberRegistry {
    #[serde(default, with = "named")]
    pub variables: BTreeMap<String, VarDef>,
    #[serde(default, with = "named")]
    pub functions: BTreeMap<String, FuncDef>,
}

impl MemberRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_variable(mut self, name: &str, value_type: ValueType) -> Self {
        self.add_variable(VarDef {
            name: name.to_string(),
            value_type,
        });
        self
    }
    pub fn with_function(mut self, def: FuncDef) -> Self {
        self.add_function(def);
        self
    }
    pub fn add_variable(&mut self, def: VarDef) {
        self.variables.insert(def.name.clone(), def);
    }
    pub fn add_function(&mut self, def: FuncDef) {
        self.functions.insert(def.name.clone(), def);
    }
    pub fn variable(&self, name: &str) -> Option<&VarDef> {
        self.variables.get(name)
    }
    pub fn function(&self, name: &str) -> Option<&FuncDef> {
        self.functions.get(name)
    }
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Registry files list definitions as arrays; in memory they are keyed by name.
mod named {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub trait Named {
        fn name(&self) -> &str;
    }
    impl Named for super::VarDef {
        fn name(&self) -> &str {
            &self.name
        }
    }
    impl Named for super::FuncDef {
        fn name(&self) -> &str {
            &self.name
        }
    }

    pub fn serialize<S: Serializer, T: Serialize>(
        map: &BTreeMap<String, T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>, T: Deserialize<'de> + Named>(
        deserializer: D,
    ) -> Result<BTreeMap<String, T>, D::Error> {
        let defs = Vec::<T>::deserialize(deserializer)?;
        Ok(defs
            .into_iter()
            .map(|def| (def.name().to_string(), def))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn loads_registry_json() {
        let registry = MemberRegistry::from_json(
            r#"{
                "variables": [{ "name": "gold", "type": "float" }],
                "functions": [
                    { "name": "give", "returns": "void",
                      "params": [{ "type": "string" }, { "type": "float", "default": 1 }] },
                    { "name": "fetch", "returns": "string", "awaitable": true }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            registry.variable("gold").map(|def| def.value_type),
            Some(ValueType::Float)
        );
        let give = registry.function("give").unwrap();
        assert_eq!(give.required_arity(), 1);
        assert_eq!(give.max_arity(), 2);
        assert_eq!(give.params[1].default, Some(Variant::Float(1.0)));
        assert!(registry.function("fetch").unwrap().awaitable);
    }

    #[test]
    fn required_arity_ignores_only_trailing_defaults() {
        let def = FuncDef {
            name: "f".into(),
            return_type: ValueType::Void,
            params: vec![
                ParamDef {
                    value_type: ValueType::Float,
                    default: Some(Variant::Float(0.0)),
                },
                ParamDef {
                    value_type: ValueType::Float,
                    default: None,
                },
            ],
            awaitable: false,
        };
        assert_eq!(def.required_arity(), 2);
    }
}
