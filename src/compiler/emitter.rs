use std::collections::HashMap;

use ordered_float::OrderedFloat;

use crate::{
    bytecode::{ScriptData, StatementCode},
    source::SourceSpan,
};

/// A jump target whose offset may not be known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
enum Binding {
    Unbound,
    Offset(usize),
    /// Resolves wherever another label does, e.g. the entry of an empty block.
    Alias(Label),
}

/// A word waiting for a label's offset.
#[derive(Debug, Clone, Copy)]
struct Fixup {
    at: usize,
    label: Label,
}

/// Writes the instruction stream and literal pools. Targets are written as
/// placeholders and patched once every label is bound.
#[derive(Default)]
pub struct Emitter {
    script: ScriptData,
    float_pool: HashMap<OrderedFloat<f64>, u32>,
    string_pool: HashMap<String, u32>,
    speaker_pool: HashMap<String, u32>,
    labels: Vec<Binding>,
    fixups: Vec<Fixup>,
    /// Places in the source that name a label, reported if it stays unbound.
    references: Vec<(Label, SourceSpan)>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn offset(&self) -> usize {
        self.script.instructions.len()
    }
    pub fn emit(&mut self, word: impl Into<u32>) {
        self.script.instructions.push(word.into());
    }
    pub fn emit_count(&mut self, count: usize) {
        self.emit(count as u32);
    }
    /// Reserves a word to be filled by [`Emitter::patch`].
    pub fn placeholder(&mut self) -> usize {
        let at = self.offset();
        self.emit(u32::MAX);
        at
    }
    pub fn patch(&mut self, at: usize, word: impl Into<u32>) {
        self.script.instructions[at] = word.into();
    }
    pub fn patch_count(&mut self, at: usize, count: usize) {
        self.patch(at, count as u32);
    }

    pub fn float(&mut self, value: f64) -> u32 {
        let floats = &mut self.script.floats;
        *self.float_pool.entry(OrderedFloat(value)).or_insert_with(|| {
            floats.push(value);
            (floats.len() - 1) as u32
        })
    }
    pub fn string(&mut self, value: &str) -> u32 {
        intern(&mut self.string_pool, &mut self.script.strings, value)
    }
    pub fn speaker(&mut self, value: &str) -> u32 {
        intern(&mut self.speaker_pool, &mut self.script.speaker_ids, value)
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(Binding::Unbound);
        Label(self.labels.len() - 1)
    }
    /// Binds `label` to the current offset.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Binding::Offset(self.offset());
    }
    pub fn alias(&mut self, label: Label, target: Label) {
        if label != target {
            self.labels[label.0] = Binding::Alias(target);
        }
    }
    pub fn is_bound(&self, label: Label) -> bool {
        self.resolve(label).is_some()
    }
    /// Whether any emitted target leads to `label`, directly or by alias.
    pub fn is_referenced(&self, label: Label) -> bool {
        self.fixups
            .iter()
            .any(|fixup| self.alias_chain(fixup.label).any(|step| step == label))
    }
    fn alias_chain(&self, label: Label) -> impl Iterator<Item = Label> + '_ {
        std::iter::successors(Some(label), move |step| match self.labels[step.0] {
            Binding::Alias(next) => Some(next),
            _ => None,
        })
        .take(self.labels.len())
    }
    fn resolve(&self, label: Label) -> Option<usize> {
        self.alias_chain(label)
            .find_map(|step| match self.labels[step.0] {
                Binding::Offset(offset) => Some(offset),
                _ => None,
            })
    }
    /// Emits a target word for `label`.
    pub fn emit_target(&mut self, label: Label) {
        let at = self.placeholder();
        self.fixups.push(Fixup { at, label });
    }
    /// Records that the source names `label` at `span`.
    pub fn refer(&mut self, label: Label, span: SourceSpan) {
        self.references.push((label, span));
    }

    /// Resolves every target. `on_unresolved` sees each recorded reference to
    /// a label that was never bound; targets of such labels point at a
    /// trailing `End` so the stream stays well formed.
    pub fn finish<F: FnMut(Label, SourceSpan)>(mut self, mut on_unresolved: F) -> ScriptData {
        for (label, span) in std::mem::take(&mut self.references) {
            if !self.is_bound(label) {
                on_unresolved(label, span);
            }
        }
        let mut trap = None;
        for fixup in std::mem::take(&mut self.fixups) {
            let target = match self.resolve(fixup.label) {
                Some(offset) => offset,
                None => {
                    *trap.get_or_insert_with(|| {
                        let at = self.offset();
                        self.emit(StatementCode::End);
                        at
                    })
                }
            };
            self.patch(fixup.at, target as u32);
        }
        self.script
    }
}

fn intern(pool: &mut HashMap<String, u32>, values: &mut Vec<String>, value: &str) -> u32 {
    if let Some(idx) = pool.get(value) {
        return *idx;
    }
    values.push(value.to_string());
    let idx = (values.len() - 1) as u32;
    pool.insert(value.to_string(), idx);
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn literals_are_pooled_once() {
        let mut emitter = Emitter::new();
        assert_eq!(emitter.float(1.5), 0);
        assert_eq!(emitter.string("hi"), 0);
        assert_eq!(emitter.float(2.0), 1);
        assert_eq!(emitter.float(1.5), 0);
        assert_eq!(emitter.string("hi"), 0);
        assert_eq!(emitter.speaker("hi"), 0);
        let script = emitter.finish(|_, _| panic!("no labels"));
        assert_eq!(script.floats, vec![1.5, 2.0]);
        assert_eq!(script.strings, vec!["hi".to_string()]);
        assert_eq!(script.speaker_ids, vec!["hi".to_string()]);
    }

    #[test]
    fn forward_targets_are_patched() {
        let mut emitter = Emitter::new();
        let later = emitter.new_label();
        let missing = emitter.new_label();
        emitter.emit_target(later);
        emitter.refer(missing, SourceSpan::from(3..7));
        emitter.emit_target(missing);
        emitter.emit_target(missing);
        let empty = emitter.new_label();
        emitter.alias(empty, later);
        emitter.emit_target(empty);
        assert!(emitter.is_referenced(later));
        assert!(!emitter.is_bound(empty));
        emitter.bind(later);
        assert!(emitter.is_bound(empty));
        emitter.emit(StatementCode::End);

        let mut unresolved = Vec::new();
        let script = emitter.finish(|label, span| unresolved.push((label, span)));
        let end: u32 = StatementCode::End.into();
        assert_eq!(script.instructions, vec![4, 5, 5, 4, end, end]);
        assert_eq!(unresolved, vec![(missing, SourceSpan::from(3..7))]);
    }
}
