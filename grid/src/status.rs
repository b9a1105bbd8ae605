use std::fmt;

/// State of a job in a scheduler's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStatus {
    Pending,
    Running,
    Hold,
    Error,
    Done,
}

impl QueueStatus {
    /// True if the scheduler will not run the job any further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error | Self::Done)
    }

    /// True while the job is queued, held or executing.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Hold => "HOLD",
            Self::Error => "ERROR",
            Self::Done => "DONE",
        })
    }
}
