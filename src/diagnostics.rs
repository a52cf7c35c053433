use crate::sample::Sample;
use log::info;

/// Per-sample progress reporting, injected at engine construction so the core
/// stays testable in isolation. Not required for correctness.
pub trait DiagnosticSink: Send + Sync {
    /// Called once after each completed counting pass.
    fn sample_recorded(&self, sample: &Sample);
}

/// Default sink forwarding one formatted line per sample to the `log` facade.
#[derive(Debug, Default)]
pub struct LogDiagnostics;

impl DiagnosticSink for LogDiagnostics {
    fn sample_recorded(&self, s: &Sample) {
        info!(
            "{}> PIf: {}/{}   PIb: {}/{}",
            s.step, s.real_fluid, s.candidate_fluid, s.real_bound, s.candidate_bound
        );
    }
}

/// Sink that discards every line, for callers that want a silent engine.
#[derive(Debug, Default)]
pub struct NullDiagnostics;

impl DiagnosticSink for NullDiagnostics {
    fn sample_recorded(&self, _sample: &Sample) {}
}
