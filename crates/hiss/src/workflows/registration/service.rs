use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Datelike;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::bot::{BotCredentials, BotError, CheckInBot, CheckInNotice};
use super::clock::{Clock, SystemClock};
use super::domain::{
    Actor, Application, ApplicationForm, ApplicationId, ApplicationStatus, FormError, NewWave,
    User, Wave, WaveError, WaveId,
};
use super::lifecycle::{self, TransitionError, TransitionEvent, TransitionKind};
use super::mailer::Mailer;
use super::notifier::{DeliveryReport, Notification, Notifier};
use super::repository::{ApplicationChange, RegistrationRepository, RepositoryError};

/// Values the service used to read from the process environment.
#[derive(Debug, Clone)]
pub struct RegistrationSettings {
    pub event_name: String,
    pub bot_credentials: BotCredentials,
}

/// Result of an admin bulk action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub updated: usize,
    pub skipped: usize,
    pub emails: DeliveryReport,
}

/// Answer to "may this chat account be linked to my application?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityCheck {
    NoApplication,
    Declined,
    AlreadyLinked,
    NotInServer,
    Verified { discord_id: String },
}

impl IdentityCheck {
    /// Text shown to the applicant when linking cannot proceed.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            IdentityCheck::NoApplication => Some("Application is not finished."),
            IdentityCheck::Declined => Some(
                "Your application was declined. Please contact an organizer if you think this is an error.",
            ),
            IdentityCheck::AlreadyLinked => Some(
                "Discord account already linked. If you think this is an error please contact an organizer.",
            ),
            IdentityCheck::NotInServer => Some(
                "Discord account not found within server. Please make sure you have already joined the event Discord server.",
            ),
            IdentityCheck::Verified { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    pub application: Application,
    pub bot_notified: bool,
}

/// Bot-facing participant lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantLookup {
    Found(CheckInNotice),
    NoApplication,
}

/// Service composing storage, notification and the check-in bot.
pub struct RegistrationService<R, M, B> {
    repository: Arc<R>,
    notifier: Notifier<M>,
    bot: Arc<B>,
    settings: RegistrationSettings,
    clock: Arc<dyn Clock>,
}

impl<R, M, B> RegistrationService<R, M, B>
where
    R: RegistrationRepository + 'static,
    M: Mailer + 'static,
    B: CheckInBot + 'static,
{
    pub fn new(
        repository: Arc<R>,
        mailer: Arc<M>,
        bot: Arc<B>,
        settings: RegistrationSettings,
    ) -> Self {
        let notifier = Notifier::new(mailer, settings.event_name.clone());
        Self {
            repository,
            notifier,
            bot,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create or refresh the account record an application hangs off.
    pub async fn register_user(&self, user: User) -> Result<User, RegistrationError> {
        Ok(self.repository.upsert_user(user).await?)
    }

    #[instrument(skip(self, new_wave), fields(wave = %new_wave.name))]
    pub async fn create_wave(&self, new_wave: NewWave) -> Result<Wave, RegistrationError> {
        let wave = new_wave.into_wave()?;
        let wave = self.repository.insert_wave(wave).await?;
        info!(wave_id = %wave.id.0, start = %wave.start, end = %wave.end, "wave created");
        Ok(wave)
    }

    /// Store a new application under the wave open right now.
    #[instrument(skip(self, form), fields(user_id = %actor.user_id.0))]
    pub async fn submit(
        &self,
        actor: &Actor,
        form: ApplicationForm,
    ) -> Result<Application, RegistrationError> {
        let now = self.clock.now();
        let form = form.normalized();
        form.validate(current_year(now))?;

        let user = self
            .repository
            .fetch_user(&actor.user_id)
            .await?
            .ok_or_else(|| RegistrationError::UnknownUser(actor.user_id.0.clone()))?;
        if self
            .repository
            .application_for_user(&actor.user_id)
            .await?
            .is_some()
        {
            return Err(RegistrationError::AlreadyApplied);
        }
        let wave = self
            .repository
            .active_wave(now)
            .await?
            .ok_or(RegistrationError::NoActiveWave)?;

        let application = Application::new(user.id.clone(), wave.id.clone(), form, now);
        let application = self
            .repository
            .insert_application(application)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict(_) => RegistrationError::AlreadyApplied,
                other => RegistrationError::Repository(other),
            })?;
        info!(application_id = %application.id.0, wave_id = %wave.id.0, "application submitted");

        let event = TransitionEvent::new(&application, TransitionKind::Submitted);
        self.notifier
            .dispatch(&[Notification {
                event,
                recipient: user.email,
            }])
            .await;
        Ok(application)
    }

    /// Replace the form on an application, keeping its wave and status.
    #[instrument(skip(self, form), fields(user_id = %actor.user_id.0, application_id = %id.0))]
    pub async fn update(
        &self,
        actor: &Actor,
        id: &ApplicationId,
        form: ApplicationForm,
    ) -> Result<Application, RegistrationError> {
        let mut application = self.load(id).await?;
        if !actor.owns(&application) && !actor.is_staff {
            return Err(TransitionError::NotOwner.into());
        }
        let form = form.normalized();
        form.validate(current_year(self.clock.now()))?;

        application.form = form;
        self.repository
            .update_application(&ApplicationChange::form(&application))
            .await?;
        Ok(application)
    }

    pub async fn status(&self, actor: &Actor) -> Result<Application, RegistrationError> {
        self.repository
            .application_for_user(&actor.user_id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound(format!("application for {}", actor.user_id.0)))
    }

    /// Admit every selected application, or none of them.
    #[instrument(skip(self, ids), fields(selected = ids.len()))]
    pub async fn approve(&self, ids: &[ApplicationId]) -> Result<BulkOutcome, RegistrationError> {
        let now = self.clock.now();
        let mut applications = self.load_selection(ids).await?;
        let mut waves = HashMap::new();
        let mut changes = Vec::with_capacity(applications.len());
        let mut events = Vec::with_capacity(applications.len());
        for application in &mut applications {
            let wave = self.wave_for(&mut waves, &application.wave_id).await?;
            let from = application.status;
            events.push(lifecycle::approve(application, &wave, now)?);
            changes.push(ApplicationChange::status(from, application));
        }
        self.commit_batch(&changes, events).await
    }

    /// Reject every selected application, or none of them.
    #[instrument(skip(self, ids), fields(selected = ids.len()))]
    pub async fn reject(&self, ids: &[ApplicationId]) -> Result<BulkOutcome, RegistrationError> {
        let applications = self.load_selection(ids).await?;
        let mut changes = Vec::with_capacity(applications.len());
        let mut events = Vec::with_capacity(applications.len());
        for mut application in applications {
            let from = application.status;
            events.push(lifecycle::reject(&mut application)?);
            changes.push(ApplicationChange::status(from, &application));
        }
        self.commit_batch(&changes, events).await
    }

    /// Send the confirmation email again to the confirmed applications in the selection.
    #[instrument(skip(self, ids), fields(selected = ids.len()))]
    pub async fn resend_confirmation(
        &self,
        ids: &[ApplicationId],
    ) -> Result<BulkOutcome, RegistrationError> {
        let applications = self.load_selection(ids).await?;
        let events: Vec<TransitionEvent> = applications
            .iter()
            .filter(|application| application.status == ApplicationStatus::Confirmed)
            .map(|application| TransitionEvent::new(application, TransitionKind::Confirmed))
            .collect();
        let skipped = applications.len() - events.len();
        let emails = self.notify(events).await;
        Ok(BulkOutcome {
            updated: 0,
            skipped,
            emails,
        })
    }

    #[instrument(skip(self), fields(user_id = %actor.user_id.0, application_id = %id.0))]
    pub async fn confirm(
        &self,
        actor: &Actor,
        id: &ApplicationId,
    ) -> Result<Application, RegistrationError> {
        let mut application = self.load(id).await?;
        let from = application.status;
        if let Some(event) = lifecycle::confirm(&mut application, actor)? {
            self.repository
                .update_application(&ApplicationChange::status(from, &application))
                .await?;
            info!("application confirmed");
            self.notify(vec![event]).await;
        }
        Ok(application)
    }

    #[instrument(skip(self), fields(user_id = %actor.user_id.0, application_id = %id.0))]
    pub async fn decline(
        &self,
        actor: &Actor,
        id: &ApplicationId,
    ) -> Result<Application, RegistrationError> {
        let mut application = self.load(id).await?;
        let from = application.status;
        if let Some(event) = lifecycle::decline(&mut application, actor)? {
            self.repository
                .update_application(&ApplicationChange::status(from, &application))
                .await?;
            info!("application declined");
            self.notify(vec![event]).await;
        }
        Ok(application)
    }

    /// Decide whether the caller may link `discord_id`, asking the bot last.
    #[instrument(skip(self), fields(user_id = %actor.user_id.0))]
    pub async fn check_external_identity(
        &self,
        actor: &Actor,
        discord_id: &str,
    ) -> Result<IdentityCheck, RegistrationError> {
        let discord_id = lifecycle::validate_external_id(discord_id)?;
        let Some(application) = self
            .repository
            .application_for_user(&actor.user_id)
            .await?
        else {
            return Ok(IdentityCheck::NoApplication);
        };
        if application.status == ApplicationStatus::Declined {
            return Ok(IdentityCheck::Declined);
        }
        if self
            .repository
            .application_for_discord_id(discord_id)
            .await?
            .is_some()
        {
            return Ok(IdentityCheck::AlreadyLinked);
        }

        if self.bot.check_user(discord_id).await? {
            Ok(IdentityCheck::Verified {
                discord_id: discord_id.to_string(),
            })
        } else {
            Ok(IdentityCheck::NotInServer)
        }
    }

    /// Link the chat identity and check the applicant in.
    ///
    /// The record is stored before the bot hears about it; a bot failure is logged and reported
    /// through `bot_notified` instead of undoing the check-in.
    #[instrument(skip(self), fields(user_id = %actor.user_id.0))]
    pub async fn link_external_identity(
        &self,
        actor: &Actor,
        discord_id: &str,
    ) -> Result<LinkOutcome, RegistrationError> {
        let discord_id = lifecycle::validate_external_id(discord_id)?;
        let mut application = self
            .repository
            .application_for_user(&actor.user_id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound(format!("application for {}", actor.user_id.0)))?;
        let holder = self
            .repository
            .application_for_discord_id(discord_id)
            .await?
            .map(|holder| holder.id);

        let event =
            lifecycle::link_external_identity(&mut application, discord_id, holder.as_ref())?;
        self.repository
            .update_application(&ApplicationChange::check_in(&application, discord_id))
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict(_) => {
                    RegistrationError::Transition(TransitionError::IdentityTaken)
                }
                other => RegistrationError::Repository(other),
            })?;
        info!(
            application_id = %application.id.0,
            transition = event.kind.label(),
            "external identity linked"
        );

        let team_name = self
            .repository
            .fetch_user(&application.user_id)
            .await?
            .and_then(|user| user.team_name);
        let notice = CheckInNotice {
            discord_id: discord_id.to_string(),
            name: application.full_name(),
            team_name,
        };
        let bot_notified = match self.bot.check_in(&notice).await {
            Ok(()) => true,
            Err(err) => {
                warn!(application_id = %application.id.0, error = %err, "check-in bot notification failed");
                false
            }
        };

        Ok(LinkOutcome {
            application,
            bot_notified,
        })
    }

    /// Participant details for the bot, gated on the shared credentials.
    pub async fn participant(
        &self,
        username: &str,
        password: &str,
        discord_id: &str,
    ) -> Result<ParticipantLookup, RegistrationError> {
        if !self.settings.bot_credentials.matches(username, password) {
            warn!("participant lookup with invalid bot credentials");
            return Err(RegistrationError::InvalidCredentials);
        }
        let discord_id = lifecycle::validate_external_id(discord_id)?;
        let Some(application) = self
            .repository
            .application_for_discord_id(discord_id)
            .await?
        else {
            return Ok(ParticipantLookup::NoApplication);
        };
        let team_name = self
            .repository
            .fetch_user(&application.user_id)
            .await?
            .and_then(|user| user.team_name);

        Ok(ParticipantLookup::Found(CheckInNotice {
            discord_id: discord_id.to_string(),
            name: application.full_name(),
            team_name,
        }))
    }

    async fn load(&self, id: &ApplicationId) -> Result<Application, RegistrationError> {
        self.repository
            .fetch_application(id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound(format!("application {}", id.0)))
    }

    /// Fetch a selection in order, failing if any id is unknown. Repeated ids count once.
    async fn load_selection(
        &self,
        ids: &[ApplicationId],
    ) -> Result<Vec<Application>, RegistrationError> {
        let mut seen = HashSet::new();
        let unique: Vec<ApplicationId> = ids
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();
        let applications = self.repository.fetch_applications(&unique).await?;
        if applications.len() != unique.len() {
            let missing = unique
                .iter()
                .find(|id| !applications.iter().any(|application| &application.id == *id))
                .map(|id| id.0.clone())
                .unwrap_or_default();
            return Err(RegistrationError::NotFound(format!("application {missing}")));
        }
        Ok(applications)
    }

    async fn wave_for(
        &self,
        cache: &mut HashMap<WaveId, Wave>,
        id: &WaveId,
    ) -> Result<Wave, RegistrationError> {
        if let Some(wave) = cache.get(id) {
            return Ok(wave.clone());
        }
        let wave = self
            .repository
            .fetch_wave(id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound(format!("wave {}", id.0)))?;
        cache.insert(id.clone(), wave.clone());
        Ok(wave)
    }

    /// Persist the batch atomically, then send its email once the write has landed.
    ///
    /// Every change is guarded by the status it was computed from, so a record that moved on
    /// between the read and the write fails the whole batch as stale.
    async fn commit_batch(
        &self,
        changes: &[ApplicationChange],
        events: Vec<TransitionEvent>,
    ) -> Result<BulkOutcome, RegistrationError> {
        if changes.is_empty() {
            return Ok(BulkOutcome::default());
        }
        self.repository.update_applications(changes).await?;
        info!(updated = changes.len(), "bulk transition committed");
        let emails = self.notify(events).await;
        Ok(BulkOutcome {
            updated: changes.len(),
            skipped: 0,
            emails,
        })
    }

    async fn notify(&self, events: Vec<TransitionEvent>) -> DeliveryReport {
        let mut notifications = Vec::with_capacity(events.len());
        for event in events {
            match self.repository.fetch_user(&event.user_id).await {
                Ok(Some(user)) => notifications.push(Notification {
                    event,
                    recipient: user.email,
                }),
                Ok(None) => {
                    warn!(user_id = %event.user_id.0, "no account on file; notification skipped")
                }
                Err(err) => {
                    warn!(user_id = %event.user_id.0, error = %err, "recipient lookup failed")
                }
            }
        }
        self.notifier.dispatch(&notifications).await
    }
}

fn current_year(now: chrono::DateTime<chrono::Utc>) -> u16 {
    u16::try_from(now.year()).unwrap_or(u16::MAX)
}

/// Error raised by the registration service.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Wave(#[from] WaveError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Bot(#[from] BotError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("There is no wave accepting applications right now.")]
    NoActiveWave,
    #[error("You can only submit one application to this event.")]
    AlreadyApplied,
    #[error("user {0} has no account")]
    UnknownUser(String),
    #[error("invalid bot credentials")]
    InvalidCredentials,
}
