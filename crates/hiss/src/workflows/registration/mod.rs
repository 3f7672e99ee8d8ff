//! Hackathon registration: applications, admission waves, notification email and bot check-in.
//!
//! Status changes live in [`lifecycle`] as pure functions over an [`Application`]; the
//! [`RegistrationService`] loads and stores records around them and forwards the resulting
//! events to the [`Notifier`].

pub mod bot;
pub mod clock;
pub mod domain;
pub mod email;
pub mod lifecycle;
pub mod mailer;
pub mod memory;
pub mod notifier;
pub mod repository;
pub mod router;
pub mod service;
pub mod sqlite;

#[cfg(test)]
mod tests;

pub use bot::{BotCredentials, BotError, CheckInBot, CheckInNotice, DiscordBotClient};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{
    Actor, Application, ApplicationForm, ApplicationId, ApplicationStatus, ApplicationStatusView,
    FormError, LevelOfStudy, NewWave, ShirtSize, User, UserId, Wave, WaveError, WaveId,
};
pub use email::EmailMessage;
pub use lifecycle::{TransitionError, TransitionEvent, TransitionKind};
pub use mailer::{LogMailer, MailError, Mailer, MailgunMailer};
pub use memory::InMemoryRepository;
pub use notifier::{DeliveryReport, Notification, Notifier};
pub use repository::{ApplicationChange, RegistrationRepository, RepositoryError};
pub use router::{registration_router, Identity, Staff, STAFF_HEADER, USER_ID_HEADER};
pub use service::{
    BulkOutcome, IdentityCheck, LinkOutcome, ParticipantLookup, RegistrationError,
    RegistrationService, RegistrationSettings,
};
pub use sqlite::SqliteRepository;
