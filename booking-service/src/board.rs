use bigdecimal::BigDecimal;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use uuid::Uuid;
use shared::{AppointmentStatus, BookingError};

use crate::models::Appointment;
use crate::schema::{appointments, customers, vehicles};
use crate::tenant::bind_tenant;

#[derive(Debug, Clone, Serialize)]
pub struct CustomerSummary {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleSummary {
    pub id: Uuid,
    pub make: String,
    pub model: String,
    pub license_plate: Option<String>,
}

/// One card on the admin board. Customer/vehicle summaries are denormalized
/// at read time; a missing summary means the referenced entity is not
/// visible to this tenant.
#[derive(Debug, Clone, Serialize)]
pub struct BoardCard {
    pub id: Uuid,
    pub status: AppointmentStatus,
    pub version: i32,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub service_codes: Vec<String>,
    pub total_amount: BigDecimal,
    pub customer: Option<CustomerSummary>,
    pub vehicle: Option<VehicleSummary>,
}

/// Appointments for one day grouped into a column per lifecycle status.
#[derive(Debug, Default, Serialize)]
pub struct BoardColumns {
    pub scheduled: Vec<BoardCard>,
    pub in_progress: Vec<BoardCard>,
    pub ready: Vec<BoardCard>,
    pub completed: Vec<BoardCard>,
    pub canceled: Vec<BoardCard>,
}

#[derive(Debug, Serialize)]
pub struct StatusCounts {
    pub scheduled: i64,
    pub in_progress: i64,
    pub ready: i64,
    pub completed: i64,
    pub canceled: i64,
}

#[derive(Debug, Serialize)]
pub struct DayStats {
    pub date: NaiveDate,
    pub total: i64,
    pub by_status: StatusCounts,
    pub completed_revenue: BigDecimal,
}

type CustomerRow = (Uuid, String, Option<String>);
type VehicleRow = (Uuid, String, String, Option<String>);

/// The admin status board for one day: the tenant's appointments whose
/// `scheduled_start` falls on `date` (UTC), joined with customer and vehicle
/// summaries and grouped by status column. Plain read-committed reads.
pub async fn get_board(
    conn: &mut AsyncPgConnection,
    tenant: Uuid,
    date: NaiveDate,
) -> Result<BoardColumns, BookingError> {
    let (day_start, day_end) = day_window(date)?;

    let rows = conn
        .transaction::<Vec<(Appointment, Option<CustomerRow>, Option<VehicleRow>)>, BookingError, _>(
            |conn| {
                Box::pin(async move {
                    bind_tenant(conn, tenant).await?;
                    let rows = appointments::table
                        .left_join(customers::table)
                        .left_join(vehicles::table)
                        .filter(appointments::tenant_id.eq(tenant))
                        .filter(appointments::scheduled_start.ge(day_start))
                        .filter(appointments::scheduled_start.lt(day_end))
                        .order(appointments::scheduled_start.asc())
                        .select((
                            appointments::all_columns,
                            (customers::id, customers::name, customers::phone).nullable(),
                            (
                                vehicles::id,
                                vehicles::make,
                                vehicles::model,
                                vehicles::license_plate,
                            )
                                .nullable(),
                        ))
                        .load(conn)
                        .await?;
                    Ok(rows)
                })
            },
        )
        .await?;

    let mut cards = Vec::with_capacity(rows.len());
    for (appointment, customer, vehicle) in rows {
        cards.push(card_from_row(appointment, customer, vehicle)?);
    }
    Ok(group_cards(cards))
}

/// Aggregate counts and completed revenue for one day's appointments.
pub async fn get_stats(
    conn: &mut AsyncPgConnection,
    tenant: Uuid,
    date: NaiveDate,
) -> Result<DayStats, BookingError> {
    let (day_start, day_end) = day_window(date)?;

    let (counts, revenue) = conn
        .transaction::<(Vec<(String, i64)>, Option<BigDecimal>), BookingError, _>(|conn| {
            Box::pin(async move {
                bind_tenant(conn, tenant).await?;

                let counts = appointments::table
                    .filter(appointments::tenant_id.eq(tenant))
                    .filter(appointments::scheduled_start.ge(day_start))
                    .filter(appointments::scheduled_start.lt(day_end))
                    .group_by(appointments::status)
                    .select((appointments::status, diesel::dsl::count_star()))
                    .load::<(String, i64)>(conn)
                    .await?;

                let revenue = appointments::table
                    .filter(appointments::tenant_id.eq(tenant))
                    .filter(appointments::scheduled_start.ge(day_start))
                    .filter(appointments::scheduled_start.lt(day_end))
                    .filter(appointments::status.eq(AppointmentStatus::Completed.as_str()))
                    .select(diesel::dsl::sum(appointments::total_amount))
                    .first::<Option<BigDecimal>>(conn)
                    .await?;

                Ok((counts, revenue))
            })
        })
        .await?;

    let mut by_status = StatusCounts {
        scheduled: 0,
        in_progress: 0,
        ready: 0,
        completed: 0,
        canceled: 0,
    };
    let mut total = 0;
    for (status, count) in counts {
        let status = AppointmentStatus::parse(&status).ok_or_else(|| {
            BookingError::Storage(format!("unknown status {status:?} in stats aggregate"))
        })?;
        total += count;
        match status {
            AppointmentStatus::Scheduled => by_status.scheduled = count,
            AppointmentStatus::InProgress => by_status.in_progress = count,
            AppointmentStatus::Ready => by_status.ready = count,
            AppointmentStatus::Completed => by_status.completed = count,
            AppointmentStatus::Canceled => by_status.canceled = count,
        }
    }

    Ok(DayStats {
        date,
        total,
        by_status,
        completed_revenue: revenue.unwrap_or_else(|| BigDecimal::from(0)),
    })
}

fn day_window(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>), BookingError> {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    let end = date
        .checked_add_days(Days::new(1))
        .ok_or_else(|| BookingError::Validation("date is out of range".to_string()))?
        .and_time(NaiveTime::MIN)
        .and_utc();
    Ok((start, end))
}

fn card_from_row(
    appointment: Appointment,
    customer: Option<CustomerRow>,
    vehicle: Option<VehicleRow>,
) -> Result<BoardCard, BookingError> {
    let status = appointment.lifecycle_status()?;
    Ok(BoardCard {
        id: appointment.id,
        status,
        version: appointment.version,
        scheduled_start: appointment.scheduled_start,
        scheduled_end: appointment.scheduled_end,
        service_codes: appointment.service_codes,
        total_amount: appointment.total_amount,
        customer: customer.map(|(id, name, phone)| CustomerSummary { id, name, phone }),
        vehicle: vehicle.map(|(id, make, model, license_plate)| VehicleSummary {
            id,
            make,
            model,
            license_plate,
        }),
    })
}

fn group_cards(cards: Vec<BoardCard>) -> BoardColumns {
    let mut columns = BoardColumns::default();
    for card in cards {
        match card.status {
            AppointmentStatus::Scheduled => columns.scheduled.push(card),
            AppointmentStatus::InProgress => columns.in_progress.push(card),
            AppointmentStatus::Ready => columns.ready.push(card),
            AppointmentStatus::Completed => columns.completed.push(card),
            AppointmentStatus::Canceled => columns.canceled.push(card),
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(status: AppointmentStatus, hour: u32) -> BoardCard {
        BoardCard {
            id: Uuid::new_v4(),
            status,
            version: 1,
            scheduled_start: NaiveDate::from_ymd_opt(2025, 1, 10)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap()
                .and_utc(),
            scheduled_end: NaiveDate::from_ymd_opt(2025, 1, 10)
                .unwrap()
                .and_hms_opt(hour + 1, 0, 0)
                .unwrap()
                .and_utc(),
            service_codes: vec!["OIL001".to_string()],
            total_amount: BigDecimal::from(2500),
            customer: None,
            vehicle: None,
        }
    }

    #[test]
    fn cards_land_in_their_status_column() {
        let columns = group_cards(vec![
            card(AppointmentStatus::Scheduled, 9),
            card(AppointmentStatus::InProgress, 10),
            card(AppointmentStatus::Scheduled, 11),
            card(AppointmentStatus::Canceled, 12),
        ]);
        assert_eq!(columns.scheduled.len(), 2);
        assert_eq!(columns.in_progress.len(), 1);
        assert_eq!(columns.ready.len(), 0);
        assert_eq!(columns.completed.len(), 0);
        assert_eq!(columns.canceled.len(), 1);
    }

    #[test]
    fn grouping_preserves_input_order() {
        let columns = group_cards(vec![
            card(AppointmentStatus::Scheduled, 9),
            card(AppointmentStatus::Scheduled, 11),
        ]);
        assert!(
            columns.scheduled[0].scheduled_start < columns.scheduled[1].scheduled_start
        );
    }

    #[test]
    fn day_window_spans_exactly_one_day() {
        let (start, end) = day_window(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()).unwrap();
        assert_eq!(start.to_rfc3339(), "2025-01-10T00:00:00+00:00");
        assert_eq!(end - start, chrono::Duration::days(1));
    }
}
