use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;
use shared::{AppointmentStatus, BookingError};

/// A booked service appointment. `version` is the sole concurrency token:
/// it starts at 1 and every successful mutation advances it by exactly 1.
#[derive(Debug, Clone, Queryable, Serialize)]
pub struct Appointment {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub vehicle_id: Uuid,
    pub status: String,
    pub version: i32,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub service_codes: Vec<String>,
    pub total_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// The stored status as a domain value. A string the enum does not
    /// recognize means the row was written outside this service.
    pub fn lifecycle_status(&self) -> Result<AppointmentStatus, BookingError> {
        AppointmentStatus::parse(&self.status).ok_or_else(|| {
            BookingError::Storage(format!(
                "appointment {} has unknown status {:?}",
                self.id, self.status
            ))
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::appointments)]
pub struct NewAppointment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub vehicle_id: Uuid,
    pub status: String,
    pub version: i32,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub service_codes: Vec<String>,
    pub total_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One idempotency reservation per `(tenant_id, key)`. The response columns
/// are finalized in the same transaction that inserts the appointment, so a
/// committed record always carries a replayable response.
#[derive(Debug, Clone, Queryable)]
pub struct IdempotencyRecord {
    pub tenant_id: Uuid,
    pub key: String,
    pub request_fingerprint: String,
    pub response_status: Option<i32>,
    pub response_body: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::idempotency_records)]
pub struct NewIdempotencyRecord {
    pub tenant_id: Uuid,
    pub key: String,
    pub request_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
