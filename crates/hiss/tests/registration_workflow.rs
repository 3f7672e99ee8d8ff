use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hiss::workflows::registration::{
    registration_router, ApplicationForm, ApplicationStatus, BotCredentials, BotError,
    CheckInBot, CheckInNotice, EmailMessage, FixedClock, LevelOfStudy, MailError, Mailer,
    NewWave, RegistrationRepository, RegistrationService, RegistrationSettings, ShirtSize,
    SqliteRepository, User, UserId, STAFF_HEADER, USER_ID_HEADER,
};
use serde_json::{json, Value};
use tower::ServiceExt;

#[derive(Default)]
struct Outbox(Mutex<Vec<EmailMessage>>);

impl Outbox {
    fn subjects(&self) -> Vec<String> {
        self.0
            .lock()
            .expect("outbox mutex poisoned")
            .iter()
            .map(|message| message.subject.clone())
            .collect()
    }
}

impl Mailer for Outbox {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        self.0
            .lock()
            .expect("outbox mutex poisoned")
            .push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
struct Bot(Mutex<Vec<CheckInNotice>>);

impl CheckInBot for Bot {
    async fn check_user(&self, _discord_id: &str) -> Result<bool, BotError> {
        Ok(true)
    }

    async fn check_in(&self, notice: &CheckInNotice) -> Result<(), BotError> {
        self.0
            .lock()
            .expect("bot mutex poisoned")
            .push(notice.clone());
        Ok(())
    }
}

fn opening_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn form(first_name: &str) -> ApplicationForm {
    ApplicationForm {
        first_name: first_name.to_string(),
        last_name: "Hopper".to_string(),
        phone_number: "+1 405 555 0199".to_string(),
        school: "Oklahoma State University".to_string(),
        major: "Mathematics".to_string(),
        level_of_study: LevelOfStudy::Graduate,
        graduation_year: 2025,
        shirt_size: ShirtSize::L,
        notes: Some("  ".to_string()),
    }
}

fn request(method: &str, uri: &str, user: &str, staff: bool, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(USER_ID_HEADER, user);
    if staff {
        builder = builder.header(STAFF_HEADER, "true");
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&value).expect("serialize body"))
        }
        None => Body::empty(),
    };
    builder.body(body).expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 4096)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json payload")
}

#[tokio::test]
async fn applicant_moves_from_submission_to_check_in_over_http() {
    let repository = Arc::new(
        SqliteRepository::open_in_memory()
            .await
            .expect("database opens"),
    );
    let outbox = Arc::new(Outbox::default());
    let bot = Arc::new(Bot::default());
    let service = Arc::new(
        RegistrationService::new(
            repository.clone(),
            outbox.clone(),
            bot.clone(),
            RegistrationSettings {
                event_name: "Hacklahoma".to_string(),
                bot_credentials: BotCredentials::new("bot", "hunter2"),
            },
        )
        .with_clock(Arc::new(FixedClock(opening_day()))),
    );
    service
        .register_user(User {
            id: UserId("grace".to_string()),
            email: "grace@example.com".to_string(),
            team_name: Some("Compilers".to_string()),
            is_staff: false,
        })
        .await
        .expect("user stored");
    let router = registration_router(service.clone());

    let wave = router
        .clone()
        .oneshot(request(
            "POST",
            "/admin/waves",
            "organizer",
            true,
            Some(json!({
                "name": "Priority",
                "start": "2023-12-15T00:00:00Z",
                "end": "2024-01-15T00:00:00Z",
                "num_days_to_rsvp": 5
            })),
        ))
        .await
        .expect("wave route");
    assert_eq!(wave.status(), StatusCode::CREATED);

    let submitted = router
        .clone()
        .oneshot(request(
            "POST",
            "/application",
            "grace",
            false,
            Some(serde_json::to_value(form("Grace")).expect("form json")),
        ))
        .await
        .expect("submit route");
    assert_eq!(submitted.status(), StatusCode::SEE_OTHER);

    let stored = repository
        .application_for_user(&UserId("grace".to_string()))
        .await
        .expect("lookup")
        .expect("application stored");
    assert!(stored.form.notes.is_none(), "blank notes are dropped");

    let approved = router
        .clone()
        .oneshot(request(
            "POST",
            "/admin/applications/approve",
            "organizer",
            true,
            Some(json!({ "application_ids": [&stored.id.0] })),
        ))
        .await
        .expect("approve route");
    assert_eq!(approved.status(), StatusCode::OK);
    assert_eq!(json_body(approved).await["updated"], json!(1));

    let expected_deadline = opening_day().date_naive().and_hms_opt(23, 59, 59).expect("valid")
        .and_utc()
        + Duration::days(5);
    let status = router
        .clone()
        .oneshot(request("GET", "/application/status", "grace", false, None))
        .await
        .expect("status route");
    let status = json_body(status).await;
    assert_eq!(status["status"], json!("admitted"));
    assert_eq!(
        status["confirmation_deadline"],
        json!(expected_deadline.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    );

    let confirmed = router
        .clone()
        .oneshot(request(
            "POST",
            &format!("/application/{}/confirm", stored.id.0),
            "grace",
            false,
            None,
        ))
        .await
        .expect("confirm route");
    assert_eq!(confirmed.status(), StatusCode::SEE_OTHER);

    let checked = router
        .clone()
        .oneshot(request(
            "GET",
            "/application/check_id/175928847299117063",
            "grace",
            false,
            None,
        ))
        .await
        .expect("check route");
    assert_eq!(checked.status(), StatusCode::SEE_OTHER);

    let linked = router
        .clone()
        .oneshot(request(
            "GET",
            "/application/link_id/175928847299117063",
            "grace",
            false,
            None,
        ))
        .await
        .expect("link route");
    assert_eq!(linked.status(), StatusCode::SEE_OTHER);

    let final_state = repository
        .fetch_application(&stored.id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(final_state.status, ApplicationStatus::Confirmed);
    assert!(final_state.checked_in);
    assert_eq!(final_state.discord_id.as_deref(), Some("175928847299117063"));

    let notices = bot.0.lock().expect("bot mutex poisoned").clone();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].name, "Grace Hopper");
    assert_eq!(notices[0].team_name.as_deref(), Some("Compilers"));

    assert_eq!(
        outbox.subjects(),
        vec![
            "We received your Hacklahoma application".to_string(),
            "Your Hacklahoma application has been approved!".to_string(),
            "You're confirmed for Hacklahoma!".to_string(),
        ]
    );
}

#[tokio::test]
async fn waves_created_through_the_service_gate_submissions() {
    let repository = Arc::new(
        SqliteRepository::open_in_memory()
            .await
            .expect("database opens"),
    );
    let service = RegistrationService::new(
        repository.clone(),
        Arc::new(Outbox::default()),
        Arc::new(Bot::default()),
        RegistrationSettings {
            event_name: "Hacklahoma".to_string(),
            bot_credentials: BotCredentials::new("bot", "hunter2"),
        },
    )
    .with_clock(Arc::new(FixedClock(opening_day())));

    let wave = service
        .create_wave(NewWave {
            name: "Walk-in".to_string(),
            start: opening_day() - Duration::hours(1),
            end: opening_day() + Duration::hours(8),
            num_days_to_rsvp: 0,
            is_walk_in_wave: true,
        })
        .await
        .expect("wave created");

    let active = repository
        .active_wave(opening_day())
        .await
        .expect("lookup")
        .expect("wave open");
    assert_eq!(active.id, wave.id);
    assert!(active.is_walk_in_wave);
}
