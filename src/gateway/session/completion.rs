//! Usage: Decides when a session is complete from the outcomes of its concurrent tasks.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SessionTask {
    RequestIngestion,
    IdleWatchdog,
    HelperExit,
    ResponseEmission,
}

impl SessionTask {
    pub(super) fn as_str(self) -> &'static str {
        match self {
            Self::RequestIngestion => "request_ingestion",
            Self::IdleWatchdog => "idle_watchdog",
            Self::HelperExit => "helper_exit",
            Self::ResponseEmission => "response_emission",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CompletionState {
    AwaitingCompletion,
    /// One of helper-exit / response-emission finished; carries which one.
    AwaitingTheOther(SessionTask),
    Completed,
}

/// Complete once both the helper has exited and response emission is done.
/// Request ingestion finishing on its own never completes a session.
#[derive(Debug)]
pub(super) struct CompletionTracker {
    state: CompletionState,
}

impl CompletionTracker {
    pub(super) fn new() -> Self {
        Self {
            state: CompletionState::AwaitingCompletion,
        }
    }

    #[cfg(test)]
    fn state(&self) -> CompletionState {
        self.state
    }

    #[cfg(test)]
    fn is_complete(&self) -> bool {
        self.state == CompletionState::Completed
    }

    pub(super) fn record(&mut self, task: SessionTask) -> CompletionState {
        if !matches!(task, SessionTask::HelperExit | SessionTask::ResponseEmission) {
            return self.state;
        }

        self.state = match self.state {
            CompletionState::AwaitingCompletion => CompletionState::AwaitingTheOther(task),
            CompletionState::AwaitingTheOther(first) if first != task => {
                CompletionState::Completed
            }
            other => other,
        };
        self.state
    }
}
