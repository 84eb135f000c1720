use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// The operation acted.
    Done,
    /// Nothing to do in the current state; not an error.
    Info,
    /// The operation was attempted and failed.
    Failed,
}

/// Resultado legible de una operación de sesión
///
/// Session operations never return `Err`; every failure ends up here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub message: String,
}

impl Outcome {
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Done,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Info,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failed,
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.kind == OutcomeKind::Failed
    }

    /// Agrega una línea extra al mensaje
    pub fn and_then_line(mut self, line: impl AsRef<str>) -> Self {
        let line = line.as_ref();
        if !line.is_empty() {
            self.message.push('\n');
            self.message.push_str(line);
        }
        self
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            OutcomeKind::Done => "✅",
            OutcomeKind::Info => "ℹ️",
            OutcomeKind::Failed => "❌",
        };
        write!(f, "{} {}", prefix, self.message)
    }
}
