// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus};

use AppointmentStatus::*;

/// A status-changing operation on an existing appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Accept,
    Attend,
    CheckIn,
    Complete,
    Cancel,
    MarkNoShow,
    Reschedule,
    RequestReschedule,
    RequestCancel,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Accept => "accept",
            Transition::Attend => "attend",
            Transition::CheckIn => "check in",
            Transition::Complete => "complete",
            Transition::Cancel => "cancel",
            Transition::MarkNoShow => "mark as no-show",
            Transition::Reschedule => "reschedule",
            Transition::RequestReschedule => "request a reschedule of",
            Transition::RequestCancel => "request cancellation of",
        }
    }

    /// Status the appointment ends in, `None` when the transition leaves it unchanged.
    pub fn target(&self) -> Option<AppointmentStatus> {
        match self {
            Transition::Accept => Some(Confirmed),
            Transition::Attend | Transition::CheckIn => Some(InProgress),
            Transition::Complete => Some(Completed),
            Transition::Cancel => Some(Cancelled),
            Transition::MarkNoShow => Some(NoShow),
            Transition::Reschedule => Some(Rescheduled),
            Transition::RequestReschedule => Some(PendingReschedule),
            Transition::RequestCancel => None,
        }
    }

    /// Check the current status against this transition's precondition.
    pub fn validate(&self, current: AppointmentStatus) -> Result<(), AppointmentError> {
        debug!("Validating {:?} from {}", self, current);

        let (allowed, required) = match self {
            Transition::Accept => (current == PendingAcceptance, "pending_acceptance"),
            Transition::Attend => (matches!(current, Confirmed | Scheduled), "confirmed or scheduled"),
            Transition::CheckIn => (matches!(current, Scheduled | Confirmed), "scheduled or confirmed"),
            Transition::Complete => (current == InProgress, "in_progress"),
            Transition::MarkNoShow => (matches!(current, Scheduled | Confirmed), "scheduled or confirmed"),
            Transition::RequestCancel => (current != Cancelled, "not cancelled"),
            Transition::Cancel => {
                if current == Cancelled {
                    warn!("Cancel attempted on an already cancelled appointment");
                    return Err(AppointmentError::Conflict("Appointment is already cancelled".to_string()));
                }
                (true, "")
            },
            Transition::Reschedule | Transition::RequestReschedule => (true, ""),
        };

        if allowed {
            return Ok(());
        }

        warn!("Invalid transition attempted: {} from {}", self.name(), current);
        Err(AppointmentError::InvalidState {
            action: self.name(),
            current,
            required: required.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const ALL: [AppointmentStatus; 9] = [
        Scheduled, Confirmed, PendingAcceptance, PendingReschedule, InProgress,
        Completed, Cancelled, NoShow, Rescheduled,
    ];

    #[test]
    fn test_accept_only_from_pending_acceptance() {
        for status in ALL {
            let result = Transition::Accept.validate(status);
            if status == PendingAcceptance {
                assert!(result.is_ok());
            } else {
                assert_matches!(
                    result,
                    Err(AppointmentError::InvalidState { current, .. }) if current == status
                );
            }
        }
    }

    #[test]
    fn test_complete_requires_in_progress() {
        assert!(Transition::Complete.validate(InProgress).is_ok());
        assert_matches!(Transition::Complete.validate(Confirmed), Err(AppointmentError::InvalidState { .. }));
    }

    #[test]
    fn test_cancel_twice_is_a_conflict() {
        assert!(Transition::Cancel.validate(Completed).is_ok());
        assert_matches!(Transition::Cancel.validate(Cancelled), Err(AppointmentError::Conflict(_)));
    }

    #[test]
    fn test_unguarded_transitions() {
        for status in ALL {
            assert!(Transition::Reschedule.validate(status).is_ok());
            assert!(Transition::RequestReschedule.validate(status).is_ok());
        }
    }

    #[test]
    fn test_invalid_state_message_names_both_states() {
        let err = Transition::Attend.validate(Completed).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("completed"));
        assert!(message.contains("confirmed or scheduled"));
    }
}
