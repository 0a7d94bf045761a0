use std::time::{Duration, Instant};

use crate::core::CompilerConfig;
use crate::diagnostics::{Diagnostic, Severity};
use crate::types::Identifier;

/// Mutable state of a compilation run: the current element's diagnostics and counters
/// accumulated over every element compiled with this context.
pub struct CompilationContext {
    pub config: CompilerConfig,
    current_element: Option<Identifier>,
    current_profile: Option<String>,
    diagnostics: Vec<Diagnostic>,
    stats: CompilationStats,
    start_time: Option<Instant>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilationStats {
    pub elements_compiled: usize,
    pub nodes_visited: usize,
    pub slices_resolved: usize,
    pub choices_expanded: usize,
    pub mappings_resolved: usize,
    pub mappings_dropped: usize,
    pub duplicates_skipped: usize,
    pub compilation_duration: Option<Duration>,
}

impl CompilationContext {
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            config: config.clone(),
            current_element: None,
            current_profile: None,
            diagnostics: Vec::new(),
            stats: CompilationStats::default(),
            start_time: None,
        }
    }

    pub fn begin_element(&mut self, element: &Identifier, profile: Option<&str>) {
        self.start_time = Some(Instant::now());
        self.current_element = Some(element.clone());
        self.current_profile = profile.map(str::to_string);
        self.diagnostics.clear();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            element = %element,
            profile = profile.unwrap_or("<none>"),
            "beginning plan compilation"
        );
    }

    pub fn end_element(&mut self) {
        if let Some(start_time) = self.start_time {
            let elapsed = start_time.elapsed();
            self.stats.compilation_duration =
                Some(self.stats.compilation_duration.unwrap_or_default() + elapsed);
        }
        self.stats.elements_compiled += 1;

        #[cfg(feature = "tracing")]
        if let Some(element) = &self.current_element {
            tracing::debug!(
                element = %element,
                total_mappings = self.stats.mappings_resolved,
                total_dropped = self.stats.mappings_dropped,
                total_slices = self.stats.slices_resolved,
                diagnostics = self.diagnostics.len(),
                "plan compilation completed"
            );
        }
    }

    pub fn current_element(&self) -> Option<&Identifier> {
        self.current_element.as_ref()
    }

    pub fn current_profile(&self) -> Option<&str> {
        self.current_profile.as_deref()
    }

    /// Records a diagnostic once; identical reports from both directions collapse.
    pub fn report(&mut self, diagnostic: Diagnostic) {
        if self.diagnostics.contains(&diagnostic) {
            return;
        }

        #[cfg(feature = "tracing")]
        match diagnostic.severity {
            Severity::Warning => tracing::warn!(
                kind = ?diagnostic.kind,
                element = %diagnostic.element,
                path = diagnostic.path.as_deref().unwrap_or(""),
                "{}",
                diagnostic.message
            ),
            Severity::Info => tracing::debug!(
                kind = ?diagnostic.kind,
                element = %diagnostic.element,
                "{}",
                diagnostic.message
            ),
        }

        if matches!(
            diagnostic.kind,
            crate::diagnostics::DiagnosticKind::UnresolvedMapping
                | crate::diagnostics::DiagnosticKind::AmbiguousValueMapping
        ) {
            self.stats.mappings_dropped += 1;
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn record_visit(&mut self) {
        self.stats.nodes_visited += 1;
    }

    pub fn record_slices(&mut self, count: usize) {
        self.stats.slices_resolved += count;
    }

    pub fn record_choice_expansion(&mut self) {
        self.stats.choices_expanded += 1;
    }

    pub fn record_resolved_mapping(&mut self) {
        self.stats.mappings_resolved += 1;
    }

    pub fn record_duplicate(&mut self) {
        self.stats.duplicates_skipped += 1;
    }

    pub fn stats(&self) -> &CompilationStats {
        &self.stats
    }

    pub fn has_warnings(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|diagnostic| diagnostic.severity == Severity::Warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;

    #[test]
    fn test_duplicate_diagnostics_collapse() {
        let mut context = CompilationContext::new(&CompilerConfig::default());
        let element = Identifier::new("shr.test", "A");
        context.begin_element(&element, Some("shr-test-A"));

        let diagnostic = Diagnostic::new(DiagnosticKind::UnresolvedMapping, &element, "missing");
        context.report(diagnostic.clone());
        context.report(diagnostic);

        assert_eq!(context.diagnostics().len(), 1);
        assert_eq!(context.stats().mappings_dropped, 1);
        assert!(context.has_warnings());

        context.end_element();
        assert_eq!(context.stats().elements_compiled, 1);
        assert!(context.stats().compilation_duration.is_some());
    }

    #[test]
    fn test_stats_accumulate_across_elements() {
        let mut context = CompilationContext::new(&CompilerConfig::default());
        for name in ["A", "B"] {
            context.begin_element(&Identifier::new("shr.test", name), None);
            context.record_resolved_mapping();
            context.end_element();
        }

        assert_eq!(context.stats().elements_compiled, 2);
        assert_eq!(context.stats().mappings_resolved, 2);
        assert_eq!(context.current_element(), Some(&Identifier::new("shr.test", "B")));
    }
}
