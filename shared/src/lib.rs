use serde::{Deserialize, Serialize};

/// Lifecycle states of an appointment on the status board.
///
/// The transition table in [`transition_allowed`] is the single source of
/// truth for which moves are legal; no call site may special-case an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    InProgress,
    Ready,
    Completed,
    Canceled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::InProgress,
        AppointmentStatus::Ready,
        AppointmentStatus::Completed,
        AppointmentStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Ready => "ready",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<AppointmentStatus> {
        match s {
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "in_progress" => Some(AppointmentStatus::InProgress),
            "ready" => Some(AppointmentStatus::Ready),
            "completed" => Some(AppointmentStatus::Completed),
            "canceled" => Some(AppointmentStatus::Canceled),
            _ => None,
        }
    }

    /// Terminal states have no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Canceled
        )
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether moving an appointment from `current` to `requested` is legal.
///
/// Allowed edges:
///
/// ```text
/// scheduled    -> in_progress, canceled
/// in_progress  -> ready, canceled
/// ready        -> completed, canceled
/// completed    -> (terminal)
/// canceled     -> (terminal)
/// ```
pub fn transition_allowed(current: AppointmentStatus, requested: AppointmentStatus) -> bool {
    use AppointmentStatus::*;
    matches!(
        (current, requested),
        (Scheduled, InProgress)
            | (Scheduled, Canceled)
            | (InProgress, Ready)
            | (InProgress, Canceled)
            | (Ready, Completed)
            | (Ready, Canceled)
    )
}

/// Domain errors for the appointment mutation core.
///
/// Every variant is surfaced to the caller with structured detail; the HTTP
/// mapping lives at the API edge. Nothing here is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    /// No verified tenant identity on the request. Fail closed.
    #[error("tenant context missing: {0}")]
    TenantContextMissing(String),

    /// Malformed payload: missing fields, bad time range, negative amount.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The appointment does not exist for this tenant.
    #[error("appointment not found")]
    NotFound,

    /// The requested status is not reachable from the stored status.
    #[error("transition from {from} to {to} is not allowed")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    /// The version precondition failed. Carries the stored state so the
    /// caller can reconcile without a second round trip.
    #[error("version conflict: expected {expected}, appointment is at {current_version}")]
    VersionConflict {
        expected: i32,
        current_version: i32,
        current_status: AppointmentStatus,
    },

    /// The idempotency key was reused with a different request payload.
    /// A client bug, not a transient condition.
    #[error("idempotency key already used with a different payload")]
    IdempotencyKeyConflict,

    /// Storage or transport failure unrelated to caller input.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<diesel::result::Error> for BookingError {
    fn from(e: diesel::result::Error) -> Self {
        BookingError::Storage(e.to_string())
    }
}
