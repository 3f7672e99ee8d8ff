use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier wrapper for submitted applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(pub String);

impl ApplicationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Account identifier issued by the upstream authentication system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaveId(pub String);

impl WaveId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Review outcome tracked on every application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Submitted,
    Admitted,
    Confirmed,
    Declined,
    Rejected,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::Admitted => "admitted",
            ApplicationStatus::Confirmed => "confirmed",
            ApplicationStatus::Declined => "declined",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "submitted" => Some(ApplicationStatus::Submitted),
            "admitted" => Some(ApplicationStatus::Admitted),
            "confirmed" => Some(ApplicationStatus::Confirmed),
            "declined" => Some(ApplicationStatus::Declined),
            "rejected" => Some(ApplicationStatus::Rejected),
            _ => None,
        }
    }

    /// Confirmed, declined and rejected applications are no longer reviewed.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Confirmed | ApplicationStatus::Declined | ApplicationStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelOfStudy {
    #[serde(rename = "H")]
    HighSchool,
    #[serde(rename = "T")]
    TechSchool,
    #[serde(rename = "U")]
    Undergraduate,
    #[serde(rename = "G")]
    Graduate,
}

impl LevelOfStudy {
    pub const fn code(self) -> &'static str {
        match self {
            LevelOfStudy::HighSchool => "H",
            LevelOfStudy::TechSchool => "T",
            LevelOfStudy::Undergraduate => "U",
            LevelOfStudy::Graduate => "G",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "H" => Some(LevelOfStudy::HighSchool),
            "T" => Some(LevelOfStudy::TechSchool),
            "U" => Some(LevelOfStudy::Undergraduate),
            "G" => Some(LevelOfStudy::Graduate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShirtSize {
    Xs,
    S,
    M,
    L,
    Xl,
    Xxl,
}

impl ShirtSize {
    pub const fn code(self) -> &'static str {
        match self {
            ShirtSize::Xs => "XS",
            ShirtSize::S => "S",
            ShirtSize::M => "M",
            ShirtSize::L => "L",
            ShirtSize::Xl => "XL",
            ShirtSize::Xxl => "XXL",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "XS" => Some(ShirtSize::Xs),
            "S" => Some(ShirtSize::S),
            "M" => Some(ShirtSize::M),
            "L" => Some(ShirtSize::L),
            "XL" => Some(ShirtSize::Xl),
            "XXL" => Some(ShirtSize::Xxl),
            _ => None,
        }
    }
}

/// Applicant supplied answers, shared by the create and update flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationForm {
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub school: String,
    pub major: String,
    pub level_of_study: LevelOfStudy,
    pub graduation_year: u16,
    pub shirt_size: ShirtSize,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Reasons a submitted form is turned away before it reaches storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("phone number must contain between 10 and 15 digits")]
    InvalidPhoneNumber,
    #[error("graduation year {year} must fall between {min} and {max}")]
    GraduationYearOutOfRange { year: u16, min: u16, max: u16 },
}

/// Applicants may still be in high school, so the window reaches well past a four year degree.
const GRADUATION_YEARS_AHEAD: u16 = 8;

impl ApplicationForm {
    pub fn validate(&self, current_year: u16) -> Result<(), FormError> {
        let required = [
            ("first name", &self.first_name),
            ("last name", &self.last_name),
            ("school", &self.school),
            ("major", &self.major),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(FormError::MissingField(field));
            }
        }

        if self.phone_number.trim().is_empty() {
            return Err(FormError::MissingField("phone number"));
        }
        let phone_ok = self
            .phone_number
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'));
        let digits = self
            .phone_number
            .chars()
            .filter(char::is_ascii_digit)
            .count();
        if !phone_ok || !(10..=15).contains(&digits) {
            return Err(FormError::InvalidPhoneNumber);
        }

        let min = current_year.saturating_sub(1);
        let max = current_year.saturating_add(GRADUATION_YEARS_AHEAD);
        if !(min..=max).contains(&self.graduation_year) {
            return Err(FormError::GraduationYearOutOfRange {
                year: self.graduation_year,
                min,
                max,
            });
        }

        Ok(())
    }

    /// Trim surrounding whitespace and drop empty notes.
    pub fn normalized(mut self) -> Self {
        self.first_name = self.first_name.trim().to_string();
        self.last_name = self.last_name.trim().to_string();
        self.phone_number = self.phone_number.trim().to_string();
        self.school = self.school.trim().to_string();
        self.major = self.major.trim().to_string();
        self.notes = self
            .notes
            .map(|notes| notes.trim().to_string())
            .filter(|notes| !notes.is_empty());
        self
    }
}

/// One applicant's registration, at most one per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub user_id: UserId,
    pub wave_id: WaveId,
    pub status: ApplicationStatus,
    pub submitted_at: DateTime<Utc>,
    pub confirmation_deadline: Option<DateTime<Utc>>,
    pub discord_id: Option<String>,
    pub checked_in: bool,
    pub form: ApplicationForm,
}

impl Application {
    pub fn new(
        user_id: UserId,
        wave_id: WaveId,
        form: ApplicationForm,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApplicationId::generate(),
            user_id,
            wave_id,
            status: ApplicationStatus::Submitted,
            submitted_at: submitted_at.trunc_subsecs(0),
            confirmation_deadline: None,
            discord_id: None,
            checked_in: false,
            form,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.form.first_name, self.form.last_name)
    }

    pub fn status_view(&self) -> ApplicationStatusView {
        ApplicationStatusView {
            application_id: self.id.clone(),
            status: self.status.label(),
            wave_id: self.wave_id.clone(),
            submitted_at: self.submitted_at,
            confirmation_deadline: self.confirmation_deadline,
            discord_id: self.discord_id.clone(),
            checked_in: self.checked_in,
        }
    }
}

/// What an applicant sees about their own application.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationStatusView {
    pub application_id: ApplicationId,
    pub status: &'static str,
    pub wave_id: WaveId,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discord_id: Option<String>,
    pub checked_in: bool,
}

/// Admission round. Applications are stamped with the wave active at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    pub id: WaveId,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub num_days_to_rsvp: u32,
    pub is_walk_in_wave: bool,
}

impl Wave {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }
}

/// Staff input for a new admission round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWave {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub num_days_to_rsvp: u32,
    #[serde(default)]
    pub is_walk_in_wave: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaveError {
    #[error("wave name is required")]
    MissingName,
    #[error("wave must end after it starts")]
    EmptyWindow,
}

impl NewWave {
    /// Validate and stamp an id. Bounds are kept to whole seconds, the precision storage keeps.
    pub fn into_wave(self) -> Result<Wave, WaveError> {
        if self.name.trim().is_empty() {
            return Err(WaveError::MissingName);
        }
        let start = self.start.trunc_subsecs(0);
        let end = self.end.trunc_subsecs(0);
        if start >= end {
            return Err(WaveError::EmptyWindow);
        }
        Ok(Wave {
            id: WaveId::generate(),
            name: self.name.trim().to_string(),
            start,
            end,
            num_days_to_rsvp: self.num_days_to_rsvp,
            is_walk_in_wave: self.is_walk_in_wave,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub team_name: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub is_staff: bool,
}

impl Actor {
    pub fn applicant(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            is_staff: false,
        }
    }

    pub fn staff(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            is_staff: true,
        }
    }

    pub fn owns(&self, application: &Application) -> bool {
        self.user_id == application.user_id
    }
}
