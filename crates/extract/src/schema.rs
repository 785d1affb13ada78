use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Booking fields in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Name,
    Email,
    Date,
    Time,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Name, Field::Email, Field::Date, Field::Time];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Email => "email",
            Field::Date => "date",
            Field::Time => "time",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingSource {
    Chat,
    Api,
    Document,
}

/// Typed slot values; `None` means not yet known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingFields {
    pub name: Option<String>,
    pub email: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl BookingFields {
    pub fn missing(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|field| match field {
                Field::Name => self.name.is_none(),
                Field::Email => self.email.is_none(),
                Field::Date => self.date.is_none(),
                Field::Time => self.time.is_none(),
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// Structured booking input; every field optional, unknown keys rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookingPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingState {
    Received,
    Parsed,
    Enriched,
    Complete,
    Incomplete,
}

/// Working state of one booking attempt. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct BookingRequest {
    pub source: BookingSource,
    pub raw_payload: String,
    pub extracted: BookingFields,
    pub resolved: BookingFields,
    pub enriched_from: Option<String>,
    pub state: BookingState,
}

impl BookingRequest {
    pub fn received(source: BookingSource, raw_payload: impl Into<String>) -> Self {
        Self {
            source,
            raw_payload: raw_payload.into(),
            extracted: BookingFields::default(),
            resolved: BookingFields::default(),
            enriched_from: None,
            state: BookingState::Received,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interview {
    pub id: String,
    pub name: String,
    pub email: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub source: BookingSource,
    pub enriched_from: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BookingOutcome {
    Complete(Interview),
    Incomplete {
        missing_fields: Vec<Field>,
        partial: BookingFields,
    },
}

impl BookingOutcome {
    pub fn interview(&self) -> Option<&Interview> {
        match self {
            BookingOutcome::Complete(interview) => Some(interview),
            BookingOutcome::Incomplete { .. } => None,
        }
    }
}

/// Result of booking a request found inside an uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "interview", rename_all = "snake_case")]
pub enum DocumentBooking {
    Booked(Interview),
    AlreadyExists(Interview),
}
