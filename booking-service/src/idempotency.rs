use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use shared::BookingError;

use crate::models::{IdempotencyRecord, NewIdempotencyRecord};
use crate::schema::idempotency_records;

/// Sha256 hex fingerprint of a request payload.
///
/// The payload is re-serialized from the parsed struct, so field order is
/// fixed by the struct definition and client-side JSON key order cannot
/// change the fingerprint.
pub fn fingerprint<T: Serialize>(payload: &T) -> Result<String, BookingError> {
    let bytes =
        serde_json::to_vec(payload).map_err(|e| BookingError::Storage(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Deletes an expired record for this key so the key becomes reusable.
/// An expired-but-unpurged record must behave exactly like a purged one.
pub async fn reclaim_expired(
    conn: &mut AsyncPgConnection,
    tenant: Uuid,
    key: &str,
) -> Result<(), BookingError> {
    diesel::delete(
        idempotency_records::table
            .filter(idempotency_records::tenant_id.eq(tenant))
            .filter(idempotency_records::key.eq(key))
            .filter(idempotency_records::expires_at.le(Utc::now())),
    )
    .execute(conn)
    .await?;
    Ok(())
}

/// Attempts to reserve `(tenant, key)` for this request. Returns `true` if
/// this caller won the reservation. Concurrent identical requests race on
/// the primary key; the loser blocks until the winner's transaction commits
/// and then observes the conflict, so it never proceeds to its own insert.
pub async fn reserve(
    conn: &mut AsyncPgConnection,
    tenant: Uuid,
    key: &str,
    request_fingerprint: &str,
    ttl: Duration,
) -> Result<bool, BookingError> {
    let now = Utc::now();
    let record = NewIdempotencyRecord {
        tenant_id: tenant,
        key: key.to_string(),
        request_fingerprint: request_fingerprint.to_string(),
        created_at: now,
        expires_at: now + ttl,
    };

    let inserted = diesel::insert_into(idempotency_records::table)
        .values(&record)
        .on_conflict((idempotency_records::tenant_id, idempotency_records::key))
        .do_nothing()
        .execute(conn)
        .await?;

    Ok(inserted == 1)
}

pub async fn fetch(
    conn: &mut AsyncPgConnection,
    tenant: Uuid,
    key: &str,
) -> Result<Option<IdempotencyRecord>, BookingError> {
    let record = idempotency_records::table
        .filter(idempotency_records::tenant_id.eq(tenant))
        .filter(idempotency_records::key.eq(key))
        .first::<IdempotencyRecord>(conn)
        .await
        .optional()?;
    Ok(record)
}

/// Stores the computed response on the reservation. Runs in the same
/// transaction as the appointment insert, so committed records are always
/// replayable.
pub async fn finalize(
    conn: &mut AsyncPgConnection,
    tenant: Uuid,
    key: &str,
    response_status: i32,
    response_body: &serde_json::Value,
) -> Result<(), BookingError> {
    diesel::update(
        idempotency_records::table
            .filter(idempotency_records::tenant_id.eq(tenant))
            .filter(idempotency_records::key.eq(key)),
    )
    .set((
        idempotency_records::response_status.eq(response_status),
        idempotency_records::response_body.eq(response_body),
    ))
    .execute(conn)
    .await?;
    Ok(())
}

/// Reclaims every expired record. Expiry only disables replay and conflict
/// detection for the key; appointments created under it are untouched.
pub async fn purge_expired(conn: &mut AsyncPgConnection) -> Result<usize, BookingError> {
    let purged = diesel::delete(
        idempotency_records::table.filter(idempotency_records::expires_at.le(Utc::now())),
    )
    .execute(conn)
    .await?;
    Ok(purged)
}
