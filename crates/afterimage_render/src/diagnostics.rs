//! Rate-limited diagnostics
//!
//! Per-frame failures (allocation failures, missing auxiliary buffers,
//! misconfigured chains) would flood the log if reported every frame. Each
//! report carries a key; only the first report of a `(kind, key)` pair is
//! logged and recorded, later ones are counted as suppressed.

use std::collections::BTreeSet;
use std::fmt;

/// Diagnostic category
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticKind {
    /// Render target allocation failed
    ResourceExhaustion,
    /// Effect still compiling, or failed to compile
    NotReady,
    /// Chain or layer set up in a way that cannot render
    MisconfiguredChain,
    /// Device reset observed
    ContextLoss,
    /// A mesh has no auxiliary buffer (e.g. emissive) to read from
    MissingAuxiliaryBuffer,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResourceExhaustion => "resource exhaustion",
            Self::NotReady => "not ready",
            Self::MisconfiguredChain => "misconfigured chain",
            Self::ContextLoss => "context loss",
            Self::MissingAuxiliaryBuffer => "missing auxiliary buffer",
        };
        f.write_str(name)
    }
}

/// A recorded diagnostic
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub key: String,
    pub message: String,
    pub frame: u64,
}

/// Warn-once diagnostic channel
#[derive(Debug, Default)]
pub struct Diagnostics {
    seen: BTreeSet<(DiagnosticKind, String)>,
    entries: Vec<Diagnostic>,
    suppressed: u64,
    frame: u64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frame stamped on new entries
    pub fn set_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    /// Report a diagnostic. Returns true if this is the first report for
    /// `(kind, key)`.
    pub fn report(
        &mut self,
        kind: DiagnosticKind,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> bool {
        let key = key.into();
        if !self.seen.insert((kind, key.clone())) {
            self.suppressed += 1;
            return false;
        }

        let message = message.into();
        log::warn!("[{}] {}: {}", kind, key, message);
        self.entries.push(Diagnostic {
            kind,
            key,
            message,
            frame: self.frame,
        });
        true
    }

    /// Whether `(kind, key)` has been reported
    pub fn has_reported(&self, kind: DiagnosticKind, key: &str) -> bool {
        self.seen.contains(&(kind, key.to_string()))
    }

    /// Allow `(kind, key)` to be reported again
    pub fn rearm(&mut self, kind: DiagnosticKind, key: &str) {
        self.seen.remove(&(kind, key.to_string()));
    }

    /// All recorded diagnostics, oldest first
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Number of recorded diagnostics of a kind
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    /// Reports dropped by the warn-once policy
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.entries.clear();
        self.suppressed = 0;
    }
}
