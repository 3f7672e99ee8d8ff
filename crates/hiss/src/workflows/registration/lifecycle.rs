//! Status transitions for applications.
//!
//! Every function checks its guards before touching the record, so a returned error always
//! leaves the application unchanged. Successful transitions report a [`TransitionEvent`] that
//! the notifier turns into outbound email; the functions themselves never perform I/O.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use super::domain::{Actor, Application, ApplicationId, ApplicationStatus, UserId, Wave};

/// Longest identifier accepted from the chat platform.
const MAX_EXTERNAL_ID_LEN: usize = 64;

/// Outcome of a successful transition, consumed by the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    pub application_id: ApplicationId,
    pub user_id: UserId,
    pub first_name: String,
    pub kind: TransitionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionKind {
    Submitted,
    Approved { confirmation_deadline: DateTime<Utc> },
    Rejected,
    Confirmed,
    Declined,
    CheckedIn { discord_id: String },
}

impl TransitionKind {
    pub const fn label(&self) -> &'static str {
        match self {
            TransitionKind::Submitted => "submitted",
            TransitionKind::Approved { .. } => "approved",
            TransitionKind::Rejected => "rejected",
            TransitionKind::Confirmed => "confirmed",
            TransitionKind::Declined => "declined",
            TransitionKind::CheckedIn { .. } => "checked_in",
        }
    }
}

impl TransitionEvent {
    pub fn new(application: &Application, kind: TransitionKind) -> Self {
        Self {
            application_id: application.id.clone(),
            user_id: application.user_id.clone(),
            first_name: application.form.first_name.clone(),
            kind,
        }
    }
}

/// Guard violations. All of them surface to callers as access denied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("You don't have permission to view this application.")]
    NotOwner,
    #[error("You can't confirm your application if it hasn't been approved.")]
    ConfirmRequiresAdmission,
    #[error("You can't decline your spot if it hasn't been approved.")]
    DeclineRequiresAdmission,
    #[error("application {application_id} cannot be approved once {status}")]
    ApprovalClosed {
        application_id: String,
        status: &'static str,
    },
    #[error("application {application_id} cannot be rejected once {status}")]
    RejectionClosed {
        application_id: String,
        status: &'static str,
    },
    #[error("Your application was declined. Please contact an organizer if you think this is an error.")]
    Declined,
    #[error("Discord account already linked. If you think this is an error please contact an organizer.")]
    IdentityTaken,
    #[error("Discord id not specified.")]
    MissingIdentity,
    #[error("Discord id '{0}' is not a valid account identifier.")]
    MalformedIdentity(String),
}

/// End of the admission day plus the wave's RSVP window, in UTC.
pub fn deadline_for(now: DateTime<Utc>, num_days_to_rsvp: u32) -> DateTime<Utc> {
    let start_of_day = Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN));
    start_of_day + Duration::days(i64::from(num_days_to_rsvp) + 1) - Duration::seconds(1)
}

/// Admit an application and stamp its confirmation deadline from `wave`'s RSVP window.
///
/// Allowed from the non-terminal statuses; re-approving an admitted application refreshes the
/// deadline against the current day.
pub fn approve(
    application: &mut Application,
    wave: &Wave,
    now: DateTime<Utc>,
) -> Result<TransitionEvent, TransitionError> {
    if application.status.is_terminal() {
        return Err(TransitionError::ApprovalClosed {
            application_id: application.id.0.clone(),
            status: application.status.label(),
        });
    }

    let confirmation_deadline = deadline_for(now, wave.num_days_to_rsvp);
    application.status = ApplicationStatus::Admitted;
    application.confirmation_deadline = Some(confirmation_deadline);

    Ok(TransitionEvent::new(
        application,
        TransitionKind::Approved {
            confirmation_deadline,
        },
    ))
}

/// Reject a submitted application.
pub fn reject(application: &mut Application) -> Result<TransitionEvent, TransitionError> {
    if application.status != ApplicationStatus::Submitted {
        return Err(TransitionError::RejectionClosed {
            application_id: application.id.0.clone(),
            status: application.status.label(),
        });
    }

    application.status = ApplicationStatus::Rejected;
    Ok(TransitionEvent::new(application, TransitionKind::Rejected))
}

/// Owner accepts their admission. Returns `None` when already confirmed.
pub fn confirm(
    application: &mut Application,
    actor: &Actor,
) -> Result<Option<TransitionEvent>, TransitionError> {
    if application.status == ApplicationStatus::Confirmed {
        return Ok(None);
    }
    if !actor.owns(application) {
        return Err(TransitionError::NotOwner);
    }
    if application.status != ApplicationStatus::Admitted {
        return Err(TransitionError::ConfirmRequiresAdmission);
    }

    application.status = ApplicationStatus::Confirmed;
    Ok(Some(TransitionEvent::new(
        application,
        TransitionKind::Confirmed,
    )))
}

/// Owner gives up their spot. Returns `None` when already declined.
pub fn decline(
    application: &mut Application,
    actor: &Actor,
) -> Result<Option<TransitionEvent>, TransitionError> {
    if application.status == ApplicationStatus::Declined {
        return Ok(None);
    }
    if !actor.owns(application) {
        return Err(TransitionError::NotOwner);
    }
    if !matches!(
        application.status,
        ApplicationStatus::Admitted | ApplicationStatus::Confirmed
    ) {
        return Err(TransitionError::DeclineRequiresAdmission);
    }

    application.status = ApplicationStatus::Declined;
    Ok(Some(TransitionEvent::new(
        application,
        TransitionKind::Declined,
    )))
}

/// Reject identifiers that could not have come from the chat platform.
pub fn validate_external_id(external_id: &str) -> Result<&str, TransitionError> {
    let trimmed = external_id.trim();
    if trimmed.is_empty() {
        return Err(TransitionError::MissingIdentity);
    }
    let well_formed = trimmed.len() <= MAX_EXTERNAL_ID_LEN
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'));
    if !well_formed {
        return Err(TransitionError::MalformedIdentity(trimmed.to_string()));
    }
    Ok(trimmed)
}

/// Attach a chat identity and mark the applicant checked in.
///
/// `current_holder` is the application that already carries `external_id`, if any.
pub fn link_external_identity(
    application: &mut Application,
    external_id: &str,
    current_holder: Option<&ApplicationId>,
) -> Result<TransitionEvent, TransitionError> {
    let external_id = validate_external_id(external_id)?;
    if application.status == ApplicationStatus::Declined {
        return Err(TransitionError::Declined);
    }
    if matches!(current_holder, Some(holder) if *holder != application.id) {
        return Err(TransitionError::IdentityTaken);
    }

    application.discord_id = Some(external_id.to_string());
    application.checked_in = true;
    Ok(TransitionEvent::new(
        application,
        TransitionKind::CheckedIn {
            discord_id: external_id.to_string(),
        },
    ))
}
