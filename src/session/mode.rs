use std::fmt;

/// Execution mode a session is permanently bound to at creation time.
///
/// Immediate sessions execute every statement as it is issued; batched
/// sessions queue write statements until an explicit flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    Immediate,
    Batched,
}

impl SessionMode {
    pub fn from_batch(batch: bool) -> Self {
        if batch {
            SessionMode::Batched
        } else {
            SessionMode::Immediate
        }
    }

    pub fn is_batched(self) -> bool {
        matches!(self, SessionMode::Batched)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Immediate => write!(f, "immediate"),
            SessionMode::Batched => write!(f, "batch"),
        }
    }
}
