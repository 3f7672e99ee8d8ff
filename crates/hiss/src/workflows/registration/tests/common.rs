use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::registration::bot::{BotCredentials, BotError, CheckInBot, CheckInNotice};
use crate::workflows::registration::clock::FixedClock;
use crate::workflows::registration::domain::{
    Actor, Application, ApplicationForm, ApplicationId, LevelOfStudy, ShirtSize, User, UserId,
    Wave, WaveId,
};
use crate::workflows::registration::email::EmailMessage;
use crate::workflows::registration::mailer::{MailError, Mailer};
use crate::workflows::registration::memory::InMemoryRepository;
use crate::workflows::registration::repository::RegistrationRepository;
use crate::workflows::registration::service::{RegistrationService, RegistrationSettings};

pub(super) type TestService = RegistrationService<InMemoryRepository, RecordingMailer, StubBot>;

pub(super) const BOT_USER: &str = "hiss-bot";
pub(super) const BOT_PASS: &str = "s3cret";

pub(super) fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("valid timestamp")
}

/// 2024-01-01T10:00:00Z, inside the open wave.
pub(super) fn now() -> DateTime<Utc> {
    at(2024, 1, 1, 10, 0)
}

pub(super) fn form() -> ApplicationForm {
    ApplicationForm {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        phone_number: "(405) 555-0142".to_string(),
        school: "University of Oklahoma".to_string(),
        major: "Computer Science".to_string(),
        level_of_study: LevelOfStudy::Undergraduate,
        graduation_year: 2026,
        shirt_size: ShirtSize::M,
        notes: None,
    }
}

pub(super) fn wave(num_days_to_rsvp: u32) -> Wave {
    Wave {
        id: WaveId("wave-1".to_string()),
        name: "Early".to_string(),
        start: at(2023, 12, 1, 0, 0),
        end: at(2024, 2, 1, 0, 0),
        num_days_to_rsvp,
        is_walk_in_wave: false,
    }
}

pub(super) fn application(user: &str, wave: &Wave) -> Application {
    let mut application = Application::new(
        UserId(user.to_string()),
        wave.id.clone(),
        form(),
        now(),
    );
    application.id = ApplicationId(format!("app-{user}"));
    application
}

pub(super) fn user(id: &str) -> User {
    User {
        id: UserId(id.to_string()),
        email: format!("{id}@example.com"),
        team_name: None,
        is_staff: false,
    }
}

pub(super) fn applicant(id: &str) -> Actor {
    Actor::applicant(id)
}

pub(super) fn settings() -> RegistrationSettings {
    RegistrationSettings {
        event_name: "Hacklahoma".to_string(),
        bot_credentials: BotCredentials::new(BOT_USER, BOT_PASS),
    }
}

pub(super) struct Harness {
    pub(super) service: Arc<TestService>,
    pub(super) repository: Arc<InMemoryRepository>,
    pub(super) mailer: Arc<RecordingMailer>,
    pub(super) bot: Arc<StubBot>,
    pub(super) wave: Wave,
}

pub(super) async fn harness() -> Harness {
    harness_with(RecordingMailer::default(), StubBot::in_server()).await
}

pub(super) async fn harness_with(mailer: RecordingMailer, bot: StubBot) -> Harness {
    let repository = Arc::new(InMemoryRepository::default());
    let mailer = Arc::new(mailer);
    let bot = Arc::new(bot);
    let wave = repository
        .insert_wave(wave(5))
        .await
        .expect("wave stored");
    let service = RegistrationService::new(
        repository.clone(),
        mailer.clone(),
        bot.clone(),
        settings(),
    )
    .with_clock(Arc::new(FixedClock(now())));

    Harness {
        service: Arc::new(service),
        repository,
        mailer,
        bot,
        wave,
    }
}

impl Harness {
    /// Register `user_id` and submit the default form on their behalf.
    pub(super) async fn submitted(&self, user_id: &str) -> Application {
        self.service
            .register_user(user(user_id))
            .await
            .expect("user stored");
        self.service
            .submit(&applicant(user_id), form())
            .await
            .expect("submission succeeds")
    }

    pub(super) async fn admitted(&self, user_id: &str) -> Application {
        let application = self.submitted(user_id).await;
        self.service
            .approve(std::slice::from_ref(&application.id))
            .await
            .expect("approval succeeds");
        self.stored(&application.id).await
    }

    pub(super) async fn confirmed(&self, user_id: &str) -> Application {
        let application = self.admitted(user_id).await;
        self.service
            .confirm(&applicant(user_id), &application.id)
            .await
            .expect("confirmation succeeds")
    }

    pub(super) async fn stored(&self, id: &ApplicationId) -> Application {
        self.repository
            .fetch_application(id)
            .await
            .expect("repository readable")
            .expect("application stored")
    }
}

#[derive(Default, Clone)]
pub(super) struct RecordingMailer {
    sent: Arc<Mutex<Vec<EmailMessage>>>,
    failing_recipient: Option<String>,
}

impl RecordingMailer {
    pub(super) fn failing_for(recipient: &str) -> Self {
        Self {
            failing_recipient: Some(recipient.to_string()),
            ..Self::default()
        }
    }

    pub(super) fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().expect("mailer mutex poisoned").clone()
    }

    pub(super) fn templates(&self) -> Vec<&'static str> {
        self.sent().iter().map(|message| message.template).collect()
    }

    pub(super) fn clear(&self) {
        self.sent.lock().expect("mailer mutex poisoned").clear();
    }
}

impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        if self.failing_recipient.as_deref() == Some(message.to.as_str()) {
            return Err(MailError::Transport("connection refused".to_string()));
        }
        self.sent
            .lock()
            .expect("mailer mutex poisoned")
            .push(message.clone());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub(super) struct StubBot {
    in_server: bool,
    unreachable: bool,
    check_ins: Arc<Mutex<Vec<CheckInNotice>>>,
}

impl StubBot {
    pub(super) fn in_server() -> Self {
        Self {
            in_server: true,
            ..Self::default()
        }
    }

    pub(super) fn not_in_server() -> Self {
        Self::default()
    }

    pub(super) fn unreachable() -> Self {
        Self {
            in_server: true,
            unreachable: true,
            ..Self::default()
        }
    }

    pub(super) fn check_ins(&self) -> Vec<CheckInNotice> {
        self.check_ins.lock().expect("bot mutex poisoned").clone()
    }
}

impl CheckInBot for StubBot {
    async fn check_user(&self, _discord_id: &str) -> Result<bool, BotError> {
        if self.unreachable {
            return Err(BotError::Transport("connection refused".to_string()));
        }
        Ok(self.in_server)
    }

    async fn check_in(&self, notice: &CheckInNotice) -> Result<(), BotError> {
        if self.unreachable {
            return Err(BotError::Transport("connection refused".to_string()));
        }
        self.check_ins
            .lock()
            .expect("bot mutex poisoned")
            .push(notice.clone());
        Ok(())
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 4096)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) async fn read_text_body(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), 4096)
        .await
        .expect("read body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}
