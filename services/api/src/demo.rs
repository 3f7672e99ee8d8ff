use crate::infra::parse_datetime;
use chrono::{DateTime, Datelike, Duration, Utc};
use clap::Args;
use hiss::error::AppError;
use hiss::workflows::registration::{
    Actor, ApplicationForm, BotCredentials, BotError, CheckInBot, CheckInNotice, EmailMessage,
    FixedClock, IdentityCheck, InMemoryRepository, LevelOfStudy, MailError, Mailer, NewWave,
    RegistrationError, RegistrationService, RegistrationSettings, ShirtSize, User, UserId,
};
use std::sync::{Arc, Mutex};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Event name used in email subjects.
    #[arg(long, default_value = "Hacklahoma")]
    pub(crate) event_name: String,
    /// Days admitted applicants have to confirm.
    #[arg(long, default_value_t = 5)]
    pub(crate) rsvp_days: u32,
    /// Pin the demo clock (RFC 3339 or YYYY-MM-DD). Defaults to now.
    #[arg(long, value_parser = parse_datetime)]
    pub(crate) now: Option<DateTime<Utc>>,
    /// Print every email body, not just the subjects.
    #[arg(long)]
    pub(crate) show_bodies: bool,
}

#[derive(Default)]
struct DemoOutbox(Mutex<Vec<EmailMessage>>);

impl DemoOutbox {
    fn drain(&self) -> Vec<EmailMessage> {
        match self.0.lock() {
            Ok(mut messages) => std::mem::take(&mut *messages),
            Err(_) => Vec::new(),
        }
    }
}

impl Mailer for DemoOutbox {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        if let Ok(mut messages) = self.0.lock() {
            messages.push(message.clone());
        }
        Ok(())
    }
}

/// Accepts every account except `nobody`, which stands in for someone outside the server.
struct DemoBot;

impl CheckInBot for DemoBot {
    async fn check_user(&self, discord_id: &str) -> Result<bool, BotError> {
        Ok(discord_id != "nobody")
    }

    async fn check_in(&self, notice: &CheckInNotice) -> Result<(), BotError> {
        println!(
            "  [bot] checked in {} ({}){}",
            notice.name,
            notice.discord_id,
            notice
                .team_name
                .as_deref()
                .map(|team| format!(" for team {team}"))
                .unwrap_or_default()
        );
        Ok(())
    }
}

const APPLICANTS: [(&str, &str, &str, Option<&str>); 4] = [
    ("ada", "Ada", "Lovelace", Some("Analytical Engines")),
    ("grace", "Grace", "Hopper", Some("Compilers")),
    ("alan", "Alan", "Turing", None),
    ("edsger", "Edsger", "Dijkstra", None),
];

fn demo_form(first_name: &str, last_name: &str, graduation_year: u16) -> ApplicationForm {
    ApplicationForm {
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        phone_number: "(405) 555-0142".to_string(),
        school: "University of Oklahoma".to_string(),
        major: "Computer Science".to_string(),
        level_of_study: LevelOfStudy::Undergraduate,
        graduation_year,
        shirt_size: ShirtSize::M,
        notes: None,
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        event_name,
        rsvp_days,
        now,
        show_bodies,
    } = args;
    let now = now.unwrap_or_else(Utc::now);

    let repository = Arc::new(InMemoryRepository::default());
    let outbox = Arc::new(DemoOutbox::default());
    let service = RegistrationService::new(
        repository.clone(),
        outbox.clone(),
        Arc::new(DemoBot),
        RegistrationSettings {
            event_name: event_name.clone(),
            bot_credentials: BotCredentials::new("demo-bot", "demo-pass"),
        },
    )
    .with_clock(Arc::new(FixedClock(now)));

    println!("Registration lifecycle demo for {event_name}");
    println!("Clock pinned at {}", now.to_rfc3339());

    let wave = service
        .create_wave(NewWave {
            name: "Priority".to_string(),
            start: now - Duration::days(7),
            end: now + Duration::days(7),
            num_days_to_rsvp: rsvp_days,
            is_walk_in_wave: false,
        })
        .await?;
    println!(
        "\nOpened wave {} ({} day(s) to RSVP)",
        wave.name, wave.num_days_to_rsvp
    );

    let graduation_year = u16::try_from(now.year()).unwrap_or(2030) + 2;
    let mut ids = Vec::new();
    for (user, first, last, team) in APPLICANTS {
        service
            .register_user(User {
                id: UserId(user.to_string()),
                email: format!("{user}@example.com"),
                team_name: team.map(str::to_string),
                is_staff: false,
            })
            .await?;
        let application = service
            .submit(
                &Actor::applicant(user),
                demo_form(first, last, graduation_year),
            )
            .await?;
        println!("  {} submitted {}", application.full_name(), application.id.0);
        ids.push(application.id);
    }

    let duplicate = service
        .submit(
            &Actor::applicant("ada"),
            demo_form("Ada", "Lovelace", graduation_year),
        )
        .await;
    if let Err(err) = duplicate {
        println!("  Second submission from ada refused: {err}");
    }
    print_outbox(&outbox, show_bodies);

    println!("\nStaff review");
    let approved = service.approve(&ids[..3]).await?;
    println!(
        "  approved {} application(s), {} email(s) delivered",
        approved.updated, approved.emails.delivered
    );
    let rejected = service.reject(&ids[3..]).await?;
    println!("  rejected {} application(s)", rejected.updated);
    match service.reject(&ids[..1]).await {
        Err(RegistrationError::Transition(err)) => {
            println!("  rejecting an admitted application is refused: {err}")
        }
        Err(err) => return Err(err.into()),
        Ok(_) => println!("  unexpected: admitted application was rejected"),
    }
    print_outbox(&outbox, show_bodies);

    println!("\nApplicant responses");
    for (user, id) in [("ada", &ids[0]), ("grace", &ids[1])] {
        let confirmed = service.confirm(&Actor::applicant(user), id).await?;
        println!("  {} confirmed", confirmed.full_name());
    }
    let declined = service.decline(&Actor::applicant("alan"), &ids[2]).await?;
    println!("  {} declined", declined.full_name());
    let resent = service.resend_confirmation(&ids).await?;
    println!(
        "  re-sent confirmation to {} applicant(s), skipped {}",
        resent.emails.attempted, resent.skipped
    );
    print_outbox(&outbox, show_bodies);

    println!("\nDiscord check-in");
    for (user, discord_id) in [
        ("ada", "80351110224678912"),
        ("grace", "nobody"),
        ("alan", "175928847299117063"),
    ] {
        let actor = Actor::applicant(user);
        match service.check_external_identity(&actor, discord_id).await? {
            IdentityCheck::Verified { discord_id } => {
                let linked = service.link_external_identity(&actor, &discord_id).await?;
                println!(
                    "  {user}: linked {discord_id} (bot notified: {})",
                    linked.bot_notified
                );
            }
            other => println!(
                "  {user}: {}",
                other.message().unwrap_or("identity check failed")
            ),
        }
    }

    println!("\nFinal statuses");
    for application in repository.applications() {
        let view = application.status_view();
        println!(
            "  {:<8} {:<10} deadline={} discord={} checked_in={}",
            application.user_id.0,
            view.status,
            view.confirmation_deadline
                .map(|deadline| deadline.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
            view.discord_id.as_deref().unwrap_or("-"),
            view.checked_in
        );
    }

    Ok(())
}

fn print_outbox(outbox: &DemoOutbox, show_bodies: bool) {
    let messages = outbox.drain();
    if messages.is_empty() {
        println!("  Outbox: empty");
        return;
    }
    println!("  Outbox:");
    for message in messages {
        println!("    -> {}: {}", message.to, message.subject);
        if show_bodies {
            for line in message.text_body.lines() {
                println!("       {line}");
            }
        }
    }
}
