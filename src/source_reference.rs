use std::sync::Arc;

use miette::{NamedSource, SourceCode};

use crate::source::LineIndex;

#[derive(Debug)]
struct SourceReferenceInner {
    named_source: NamedSource,
    line_index: LineIndex,
    name: String,
}

/// A script's name and text, cheaply cloneable into every diagnostic that
/// needs to render a snippet.
#[derive(Clone, Debug)]
pub struct SourceReference(Arc<SourceReferenceInner>);

impl SourceReference {
    pub fn new(name: String, source: String) -> Self {
        SourceReference(Arc::new(SourceReferenceInner {
            line_index: LineIndex::new(&source),
            named_source: NamedSource::new(name.clone(), source),
            name,
        }))
    }
    fn inner(&self) -> &SourceReferenceInner {
        self.0.as_ref()
    }
    pub fn name(&self) -> &str {
        &self.inner().name
    }
    pub fn line_index(&self) -> &LineIndex {
        &self.inner().line_index
    }
}

impl SourceCode for SourceReference {
    fn read_span<'a>(
        &'a self,
        span: &miette::SourceSpan,
        context_lines_before: usize,
        context_lines_after: usize,
    ) -> Result<Box<dyn miette::SpanContents<'a> + 'a>, miette::MietteError> {
        self.inner()
            .named_source
            .read_span(span, context_lines_before, context_lines_after)
    }
}
