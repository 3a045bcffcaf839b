use fm_core::types::SessionStatus;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// An illegal session state change was attempted. Carries the current
/// state; the session is left unchanged.
#[derive(Debug, thiserror::Error)]
#[error("invalid transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// Returns `true` when moving from `from` to `to` is a legal transition.
///
/// Valid transitions:
/// - Queued  -> Running              (confirmed process spawn)
/// - Queued  -> Failed               (spawn failure)
/// - Queued  -> Cancelled            (cancelled before spawn)
/// - Running -> Paused | Completed | Failed | Cancelled
/// - Paused  -> Running              (resume)
/// - Paused  -> Failed | Cancelled   (process died / stop while paused)
pub fn can_transition(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;
    matches!(
        (from, to),
        (Queued, Running)
            | (Queued, Failed)
            | (Queued, Cancelled)
            | (Running, Paused)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Paused, Running)
            | (Paused, Failed)
            | (Paused, Cancelled)
    )
}

// ---------------------------------------------------------------------------
// SessionStateMachine
// ---------------------------------------------------------------------------

/// Enforces the session lifecycle over [`SessionStatus`] values and keeps
/// a transition history for diagnostics.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    current: SessionStatus,
    history: Vec<(SessionStatus, SessionStatus)>,
}

impl SessionStateMachine {
    /// Start a fresh machine in `Queued`.
    pub fn new() -> Self {
        Self::at(SessionStatus::Queued)
    }

    /// Resume a machine at a known state (e.g. loaded from the store).
    pub fn at(current: SessionStatus) -> Self {
        Self {
            current,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionStatus {
        self.current
    }

    pub fn history(&self) -> &[(SessionStatus, SessionStatus)] {
        &self.history
    }

    /// Attempt to move to `to`; rejected transitions leave state unchanged.
    pub fn transition_to(&mut self, to: SessionStatus) -> Result<SessionStatus, InvalidTransition> {
        if !can_transition(self.current, to) {
            return Err(InvalidTransition {
                from: self.current,
                to,
            });
        }
        let from = self.current;
        self.current = to;
        self.history.push((from, to));
        tracing::debug!(from = %from, to = %to, "session state transition");
        Ok(to)
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
