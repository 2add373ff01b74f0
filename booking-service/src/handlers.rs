use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use shared::{transition_allowed, AppointmentStatus, BookingError};

use crate::idempotency;
use crate::models::{Appointment, NewAppointment};
use crate::schema::appointments;
use crate::tenant::bind_tenant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub customer_id: Uuid,
    pub vehicle_id: Uuid,
    pub service_codes: Vec<String>,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub total_amount: BigDecimal,
}

impl CreateAppointmentRequest {
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.scheduled_start >= self.scheduled_end {
            return Err(BookingError::Validation(
                "scheduled_start must be before scheduled_end".to_string(),
            ));
        }
        if self.total_amount < BigDecimal::from(0) {
            return Err(BookingError::Validation(
                "total_amount must be non-negative".to_string(),
            ));
        }
        if self.service_codes.is_empty() {
            return Err(BookingError::Validation(
                "service_codes must not be empty".to_string(),
            ));
        }
        for (i, code) in self.service_codes.iter().enumerate() {
            if code.trim().is_empty() {
                return Err(BookingError::Validation(format!(
                    "service_codes[{i}] must not be blank"
                )));
            }
            if self.service_codes[..i].contains(code) {
                return Err(BookingError::Validation(format!(
                    "service_codes contains duplicate entry {code:?}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum CreateOutcome {
    Created(Appointment),
    /// A duplicate of an earlier request; `body` is the stored response.
    Replayed { body: serde_json::Value },
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub new_status: AppointmentStatus,
    pub expected_version: i32,
}

/// Decides a move against the stored row.
///
/// The version precondition is evaluated before the transition table: a
/// stale retry of an already-applied move must surface as a conflict
/// carrying the current state, and transition validity is only meaningful
/// against the version the caller actually observed.
pub fn evaluate_move(
    current_status: AppointmentStatus,
    current_version: i32,
    requested: AppointmentStatus,
    expected_version: i32,
) -> Result<(), BookingError> {
    if current_version != expected_version {
        return Err(BookingError::VersionConflict {
            expected: expected_version,
            current_version,
            current_status,
        });
    }
    if !transition_allowed(current_status, requested) {
        return Err(BookingError::InvalidTransition {
            from: current_status,
            to: requested,
        });
    }
    Ok(())
}

/// Moves an appointment to a new lifecycle status.
///
/// Runs as a single transaction: read the row for this tenant, decide the
/// move against the stored state, then apply a conditional update keyed on
/// `version = expected_version`. The conditional update is the sole ordering
/// mechanism; under concurrent moves exactly one caller per version number
/// succeeds and every other caller observes a conflict with the fresh state.
pub async fn move_appointment(
    conn: &mut AsyncPgConnection,
    tenant: Uuid,
    appointment_id: Uuid,
    request: &MoveRequest,
) -> Result<Appointment, BookingError> {
    if request.expected_version < 1 {
        return Err(BookingError::Validation(
            "expected_version must be at least 1".to_string(),
        ));
    }

    let requested = request.new_status;
    let expected_version = request.expected_version;

    let appointment = conn
        .transaction::<_, BookingError, _>(|conn| {
            Box::pin(async move {
                bind_tenant(conn, tenant).await?;

                let current = appointments::table
                    .filter(appointments::id.eq(appointment_id))
                    .filter(appointments::tenant_id.eq(tenant))
                    .first::<Appointment>(conn)
                    .await
                    .optional()?
                    .ok_or(BookingError::NotFound)?;

                evaluate_move(
                    current.lifecycle_status()?,
                    current.version,
                    requested,
                    expected_version,
                )?;

                let updated = diesel::update(
                    appointments::table
                        .filter(appointments::id.eq(appointment_id))
                        .filter(appointments::tenant_id.eq(tenant))
                        .filter(appointments::version.eq(expected_version)),
                )
                .set((
                    appointments::status.eq(requested.as_str()),
                    appointments::version.eq(appointments::version + 1),
                    appointments::updated_at.eq(Utc::now()),
                ))
                .get_result::<Appointment>(conn)
                .await
                .optional()?;

                match updated {
                    Some(appointment) => Ok(appointment),
                    None => {
                        // A concurrent move committed between our read and the
                        // conditional update; report the state it left behind.
                        let fresh = appointments::table
                            .filter(appointments::id.eq(appointment_id))
                            .filter(appointments::tenant_id.eq(tenant))
                            .first::<Appointment>(conn)
                            .await
                            .optional()?
                            .ok_or(BookingError::NotFound)?;
                        Err(BookingError::VersionConflict {
                            expected: expected_version,
                            current_version: fresh.version,
                            current_status: fresh.lifecycle_status()?,
                        })
                    }
                }
            })
        })
        .await?;

    info!(
        appointment = %appointment.id,
        status = %appointment.status,
        version = appointment.version,
        "Appointment moved"
    );

    Ok(appointment)
}

/// Creates an appointment, deduplicating retries when the caller supplied an
/// idempotency key.
///
/// With a key, a single transaction reclaims any expired reservation for the
/// key, attempts an insert-if-absent reservation, and either (winner) inserts
/// the appointment and finalizes the stored response, or (loser) compares
/// fingerprints against the committed record and replays or rejects. Without
/// a key this is a plain insert.
pub async fn create_appointment(
    conn: &mut AsyncPgConnection,
    tenant: Uuid,
    idempotency_key: Option<&str>,
    request: &CreateAppointmentRequest,
    ttl: Duration,
) -> Result<CreateOutcome, BookingError> {
    request.validate()?;

    let Some(key) = idempotency_key else {
        let appointment = conn
            .transaction::<_, BookingError, _>(|conn| {
                Box::pin(async move {
                    bind_tenant(conn, tenant).await?;
                    insert_appointment(conn, tenant, request).await
                })
            })
            .await?;
        info!(appointment = %appointment.id, "Appointment created");
        return Ok(CreateOutcome::Created(appointment));
    };

    let request_fingerprint = idempotency::fingerprint(request)?;

    let outcome = conn
        .transaction::<_, BookingError, _>(|conn| {
            Box::pin(async move {
                bind_tenant(conn, tenant).await?;
                idempotency::reclaim_expired(conn, tenant, key).await?;

                let won = idempotency::reserve(conn, tenant, key, &request_fingerprint, ttl)
                    .await?;
                if won {
                    let appointment = insert_appointment(conn, tenant, request).await?;
                    let body = serde_json::to_value(&appointment)
                        .map_err(|e| BookingError::Storage(e.to_string()))?;
                    idempotency::finalize(conn, tenant, key, 201, &body).await?;
                    return Ok(CreateOutcome::Created(appointment));
                }

                let record = idempotency::fetch(conn, tenant, key).await?.ok_or_else(|| {
                    BookingError::Storage(
                        "idempotency record disappeared after reservation conflict".to_string(),
                    )
                })?;
                if record.request_fingerprint != request_fingerprint {
                    return Err(BookingError::IdempotencyKeyConflict);
                }
                let body = record.response_body.ok_or_else(|| {
                    BookingError::Storage(
                        "idempotency record has no stored response".to_string(),
                    )
                })?;
                Ok(CreateOutcome::Replayed { body })
            })
        })
        .await?;

    match &outcome {
        CreateOutcome::Created(appointment) => {
            info!(appointment = %appointment.id, key, "Appointment created");
        }
        CreateOutcome::Replayed { .. } => {
            info!(key, "Duplicate create replayed from idempotency record");
        }
    }

    Ok(outcome)
}

async fn insert_appointment(
    conn: &mut AsyncPgConnection,
    tenant: Uuid,
    request: &CreateAppointmentRequest,
) -> Result<Appointment, BookingError> {
    let now = Utc::now();
    let new_appointment = NewAppointment {
        id: Uuid::new_v4(),
        tenant_id: tenant,
        customer_id: request.customer_id,
        vehicle_id: request.vehicle_id,
        status: AppointmentStatus::Scheduled.as_str().to_string(),
        version: 1,
        scheduled_start: request.scheduled_start,
        scheduled_end: request.scheduled_end,
        service_codes: request.service_codes.clone(),
        total_amount: request.total_amount.clone(),
        created_at: now,
        updated_at: now,
    };

    let appointment = diesel::insert_into(appointments::table)
        .values(&new_appointment)
        .get_result::<Appointment>(conn)
        .await?;

    Ok(appointment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentStatus::*;

    fn sample_request() -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            customer_id: Uuid::new_v4(),
            vehicle_id: Uuid::new_v4(),
            service_codes: vec!["OIL001".to_string()],
            scheduled_start: "2025-01-10T10:00:00Z".parse().unwrap(),
            scheduled_end: "2025-01-10T11:00:00Z".parse().unwrap(),
            total_amount: BigDecimal::from(2500),
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(sample_request().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_time_range() {
        let mut request = sample_request();
        std::mem::swap(&mut request.scheduled_start, &mut request.scheduled_end);
        assert!(matches!(
            request.validate(),
            Err(BookingError::Validation(_))
        ));
    }

    #[test]
    fn rejects_zero_length_window() {
        let mut request = sample_request();
        request.scheduled_end = request.scheduled_start;
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_negative_amount() {
        let mut request = sample_request();
        request.total_amount = BigDecimal::from(-1);
        assert!(matches!(
            request.validate(),
            Err(BookingError::Validation(_))
        ));
    }

    #[test]
    fn zero_amount_is_allowed() {
        let mut request = sample_request();
        request.total_amount = BigDecimal::from(0);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn rejects_empty_and_duplicate_service_codes() {
        let mut request = sample_request();
        request.service_codes.clear();
        assert!(request.validate().is_err());

        request.service_codes = vec!["OIL001".to_string(), " ".to_string()];
        assert!(request.validate().is_err());

        request.service_codes = vec!["OIL001".to_string(), "OIL001".to_string()];
        assert!(request.validate().is_err());
    }

    #[test]
    fn stale_version_wins_over_invalid_transition() {
        // A retried move after a successful transition carries both a stale
        // version and a now-invalid edge; the caller needs the conflict.
        let err = evaluate_move(InProgress, 2, InProgress, 1).unwrap_err();
        match err {
            BookingError::VersionConflict {
                expected,
                current_version,
                current_status,
            } => {
                assert_eq!(expected, 1);
                assert_eq!(current_version, 2);
                assert_eq!(current_status, InProgress);
            }
            other => panic!("expected version conflict, got {other:?}"),
        }
    }

    #[test]
    fn invalid_transition_reported_when_version_is_current() {
        let err = evaluate_move(InProgress, 2, Completed, 2).unwrap_err();
        assert!(matches!(
            err,
            BookingError::InvalidTransition {
                from: InProgress,
                to: Completed,
            }
        ));
    }

    #[test]
    fn matching_version_and_legal_edge_is_accepted() {
        assert!(evaluate_move(Scheduled, 1, InProgress, 1).is_ok());
        assert!(evaluate_move(Ready, 5, Completed, 5).is_ok());
        assert!(evaluate_move(Ready, 5, Canceled, 5).is_ok());
    }
}
