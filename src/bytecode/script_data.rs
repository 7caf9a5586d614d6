use serde::{Deserialize, Serialize};

use super::reader::{CodeReadError, Pool};

/// The compiled artifact: literal pools plus the instruction stream.
///
/// Indices into every pool are stable across serialization, so a runtime may
/// load a script written by another process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptData {
    pub speaker_ids: Vec<String>,
    pub floats: Vec<f64>,
    pub strings: Vec<String>,
    pub instructions: Vec<u32>,
}

impl ScriptData {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
    pub fn speaker_id(&self, index: usize) -> Result<&str, CodeReadError> {
        self.speaker_ids
            .get(index)
            .map(String::as_str)
            .ok_or(CodeReadError::InvalidPoolIndex(Pool::SpeakerIds, index))
    }
    pub fn float(&self, index: usize) -> Result<f64, CodeReadError> {
        self.floats
            .get(index)
            .copied()
            .ok_or(CodeReadError::InvalidPoolIndex(Pool::Floats, index))
    }
    pub fn string(&self, index: usize) -> Result<&str, CodeReadError> {
        self.strings
            .get(index)
            .map(String::as_str)
            .ok_or(CodeReadError::InvalidPoolIndex(Pool::Strings, index))
    }
    pub fn word(&self, offset: usize) -> Result<u32, CodeReadError> {
        self.instructions
            .get(offset)
            .copied()
            .ok_or(CodeReadError::UnexpectedEnd(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn json_keeps_pool_order() {
        let script = ScriptData {
            speaker_ids: vec!["A".into()],
            floats: vec![1.0, 0.5],
            strings: vec!["start".into(), "Hello".into()],
            instructions: vec![0, 3, 0, 1],
        };
        let json = script.to_json().unwrap();
        assert_eq!(ScriptData::from_json(&json).unwrap(), script);
        assert_eq!(script.float(1), Ok(0.5));
        assert_eq!(
            script.string(2),
            Err(CodeReadError::InvalidPoolIndex(Pool::Strings, 2))
        );
    }
}
