use std::collections::HashMap;

use miette::Diagnostic;
use thiserror::Error;

use crate::{
    registry::{FuncDef, MemberRegistry},
    value::{ValueType, Variant},
};

#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum HostError {
    #[error("Unknown variable {0}")]
    UnknownVariable(String),
    #[error("Unknown function {0}")]
    UnknownFunction(String),
    #[error("{0}")]
    Failed(String),
}

/// Outcome of starting an awaitable host call.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncCall {
    /// The call finished straight away.
    Ready(Variant),
    /// The result arrives later through [`super::Runtime::complete_async_call`].
    Pending,
}

/// The embedding application's side of a playthrough: its variables and
/// callable functions.
pub trait HostBinding {
    fn try_get_variable(&self, name: &str) -> Option<Variant>;
    fn variable_type(&self, name: &str) -> ValueType;
    fn set_variable(&mut self, name: &str, value: Variant) -> Result<(), HostError>;
    fn method_return_type(&self, name: &str) -> ValueType;
    fn call_method(&mut self, name: &str, args: &[Variant]) -> Result<Variant, HostError>;
    fn call_async_method(&mut self, name: &str, args: &[Variant]) -> Result<AsyncCall, HostError>;

    /// Display name for a speaker read from a variable.
    fn get_name(&mut self, speaker: &Variant) -> Result<String, HostError> {
        Ok(speaker.to_string())
    }
}

type SyncFn = Box<dyn FnMut(&[Variant]) -> Result<Variant, HostError>>;
type AsyncFn = Box<dyn FnMut(&[Variant]) -> Result<AsyncCall, HostError>>;

enum HostFn {
    Sync(SyncFn),
    Async(AsyncFn),
}

/// A [`HostBinding`] kept entirely in memory: a variable map plus registered
/// closures.
#[derive(Default)]
pub struct MemoryHost {
    registry: MemberRegistry,
    variables: HashMap<String, Variant>,
    functions: HashMap<String, HostFn>,
    speaker_names: HashMap<String, String>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }
    /// Declares a variable with the type of its initial value.
    pub fn with_variable(mut self, name: &str, value: impl Into<Variant>) -> Self {
        let value = value.into();
        self.registry = self.registry.with_variable(name, value.type_of());
        self.variables.insert(name.to_string(), value);
        self
    }
    pub fn with_function<F>(mut self, def: FuncDef, function: F) -> Self
    where
        F: FnMut(&[Variant]) -> Result<Variant, HostError> + 'static,
    {
        let def = FuncDef {
            awaitable: false,
            ..def
        };
        self.functions
            .insert(def.name.clone(), HostFn::Sync(Box::new(function)));
        self.registry.add_function(def);
        self
    }
    pub fn with_async_function<F>(mut self, def: FuncDef, function: F) -> Self
    where
        F: FnMut(&[Variant]) -> Result<AsyncCall, HostError> + 'static,
    {
        let def = FuncDef {
            awaitable: true,
            ..def
        };
        self.functions
            .insert(def.name.clone(), HostFn::Async(Box::new(function)));
        self.registry.add_function(def);
        self
    }
    pub fn with_speaker_name(mut self, id: &str, name: &str) -> Self {
        self.speaker_names.insert(id.to_string(), name.to_string());
        self
    }
    pub fn variable(&self, name: &str) -> Option<&Variant> {
        self.variables.get(name)
    }
    /// Everything this host exposes, for the compiler.
    pub fn registry(&self) -> &MemberRegistry {
        &self.registry
    }
}

impl HostBinding for MemoryHost {
    fn try_get_variable(&self, name: &str) -> Option<Variant> {
        self.variables.get(name).cloned()
    }

    fn variable_type(&self, name: &str) -> ValueType {
        self.registry
            .variable(name)
            .map_or(ValueType::Undefined, |def| def.value_type)
    }

    fn set_variable(&mut self, name: &str, value: Variant) -> Result<(), HostError> {
        let expected = self.variable_type(name);
        if !expected.is_defined() {
            return Err(HostError::UnknownVariable(name.to_string()));
        }
        if value.type_of() != expected {
            return Err(HostError::Failed(format!(
                "cannot store {} in {} variable {}",
                value.type_of().fmt_a(),
                expected,
                name
            )));
        }
        self.variables.insert(name.to_string(), value);
        Ok(())
    }

    fn method_return_type(&self, name: &str) -> ValueType {
        self.registry
            .function(name)
            .map_or(ValueType::Undefined, |def| def.return_type)
    }

    fn call_method(&mut self, name: &str, args: &[Variant]) -> Result<Variant, HostError> {
        match self.functions.get_mut(name) {
            Some(HostFn::Sync(function)) => function(args),
            Some(HostFn::Async(_)) => Err(HostError::Failed(format!("{} must be awaited", name))),
            None => Err(HostError::UnknownFunction(name.to_string())),
        }
    }

    fn call_async_method(&mut self, name: &str, args: &[Variant]) -> Result<AsyncCall, HostError> {
        match self.functions.get_mut(name) {
            Some(HostFn::Async(function)) => function(args),
            Some(HostFn::Sync(_)) => {
                Err(HostError::Failed(format!("{} cannot be awaited", name)))
            }
            None => Err(HostError::UnknownFunction(name.to_string())),
        }
    }

    fn get_name(&mut self, speaker: &Variant) -> Result<String, HostError> {
        let id = speaker.to_string();
        Ok(self.speaker_names.get(&id).cloned().unwrap_or(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn variables_keep_their_declared_type() {
        let mut host = MemoryHost::new().with_variable("gold", 3.0);
        assert_eq!(host.variable_type("gold"), ValueType::Float);
        assert_eq!(host.set_variable("gold", 5.0.into()), Ok(()));
        assert_eq!(host.try_get_variable("gold"), Some(Variant::Float(5.0)));
        assert!(matches!(
            host.set_variable("gold", "lots".into()),
            Err(HostError::Failed(_))
        ));
        assert_eq!(
            host.set_variable("silver", 1.0.into()),
            Err(HostError::UnknownVariable("silver".into()))
        );
    }

    #[test]
    fn functions_are_registered_and_called() {
        let def = FuncDef {
            name: "double".into(),
            return_type: ValueType::Float,
            params: vec![],
            awaitable: true,
        };
        let mut host = MemoryHost::new().with_function(def, |args| {
            Ok(Variant::Float(args[0].as_float().unwrap_or(0.0) * 2.0))
        });
        assert!(!host.registry().function("double").unwrap().awaitable);
        assert_eq!(host.method_return_type("double"), ValueType::Float);
        assert_eq!(
            host.call_method("double", &[Variant::Float(2.0)]),
            Ok(Variant::Float(4.0))
        );
        assert!(host.call_async_method("double", &[]).is_err());
        assert_eq!(
            host.call_method("triple", &[]),
            Err(HostError::UnknownFunction("triple".into()))
        );
    }

    #[test]
    fn speaker_names_fall_back_to_the_id() {
        let mut host = MemoryHost::new().with_speaker_name("bo", "Bo the Bold");
        assert_eq!(host.get_name(&"bo".into()), Ok("Bo the Bold".to_string()));
        assert_eq!(host.get_name(&"al".into()), Ok("al".to_string()));
    }
}
