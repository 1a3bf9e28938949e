use std::fmt;
use std::io::Write;

/// Recoverable condition worth a manual look.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A detected branch line has no control-transfer instruction behind it.
    BranchSanityMismatch,
    /// A brace/parenthesis scan ran off the end of the file.
    UnterminatedConstruct,
    /// A file named by the model is not on disk.
    MissingSourceFile,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::BranchSanityMismatch => "branch-sanity-mismatch",
            DiagnosticKind::UnterminatedConstruct => "unterminated-construct",
            DiagnosticKind::MissingSourceFile => "missing-source-file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: String,
    pub line: Option<u32>,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        file: impl Into<String>,
        line: Option<u32>,
        kind: DiagnosticKind,
        message: impl Into<String>,
    ) -> Self {
        Self { file: file.into(), line, kind, message: message.into() }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: [{}] {}", self.file, line, self.kind.as_str(), self.message),
            None => write!(f, "{}: [{}] {}", self.file, self.kind.as_str(), self.message),
        }
    }
}

/// Write the audit log: a header line, then one diagnostic per line.
pub fn write_diagnostics_log<W: Write>(
    out: &mut W,
    generated_at: &str,
    diagnostics: &[Diagnostic],
) -> std::io::Result<()> {
    writeln!(out, "# tracecov diagnostics, generated {generated_at}: {} entries", diagnostics.len())?;
    for diag in diagnostics {
        writeln!(out, "{diag}")?;
    }
    Ok(())
}
