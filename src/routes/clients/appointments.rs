use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, QueryDsl, SelectableHelper, upsert::excluded,
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    booking::{
        availability::{BookedInterval, check_recurring_availability, occurrence_dates},
        recurrence::{RecurrenceFrequency, day_of_week_index, upcoming, week_of_month},
        slots::{SlotType, TimeWindow, ensure_contiguous, slots_needed},
        status::AppointmentStatus,
    },
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::{
        AppointmentEntity, CreateAppointmentEntity, CreateRecurringRuleEntity,
        CreateTimeSlotEntity, ListingEntity, RecurringRuleEntity, ServiceVariant, TimeSlotEntity,
    },
    schema::{appointments, listings, provider_time_slots, recurring_rules},
};

/// Number of upcoming dates shown when previewing a recurrence.
const PREVIEW_COUNT: usize = 3;

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/clients/appointments",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_appointments))
            .routes(utoipa_axum::routes!(book))
            .routes(utoipa_axum::routes!(preview_occurrences))
            .routes(utoipa_axum::routes!(cancel_appointment))
            .route_layer(axum::middleware::from_fn(
                middleware::clients_authorization,
            )),
    )
}

#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct BookAppointmentReq {
    pub listing_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    #[serde(default = "once")]
    pub frequency: RecurrenceFrequency,
    /// Name of one of the listing's service variants.
    pub variant: Option<String>,
    pub notes: Option<String>,
}

fn once() -> RecurrenceFrequency {
    RecurrenceFrequency::Once
}

#[derive(Serialize, ToSchema, Debug)]
pub struct Booking {
    pub appointment: AppointmentEntity,
    /// Later occurrences of a recurring booking, anchor excluded.
    pub occurrences: Vec<AppointmentEntity>,
    pub recurring_rule: Option<RecurringRuleEntity>,
    /// Price of a single occurrence.
    pub price: f64,
    pub currency: String,
}

/// Fetch the authenticated client's appointments, most recent first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Appointments"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List my appointments", body = StdResponse<Vec<AppointmentEntity>, String>)
    )
)]
async fn get_my_appointments(
    State(state): State<AppState>,
    Extension(client_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let appointments: Vec<AppointmentEntity> = appointments::table
        .filter(appointments::client_id.eq(client_id))
        .order_by((
            appointments::appointment_date.desc(),
            appointments::start_time.desc(),
        ))
        .select(AppointmentEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get my appointments")?;

    Ok(StdResponse {
        data: Some(appointments),
        message: Some("Get my appointments successfully"),
    })
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct PreviewQuery {
    date: NaiveDate,
    frequency: RecurrenceFrequency,
}

#[derive(Serialize, ToSchema)]
struct PreviewRes {
    frequency: RecurrenceFrequency,
    dates: Vec<NaiveDate>,
}

/// Preview the next dates a recurring booking would occupy.
#[utoipa::path(
    get,
    path = "/preview",
    tags = ["Appointments"],
    security(("bearerAuth" = [])),
    params(PreviewQuery),
    responses(
        (status = 200, description = "Upcoming occurrences", body = StdResponse<PreviewRes, String>)
    )
)]
async fn preview_occurrences(
    Query(query): Query<PreviewQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(StdResponse {
        data: Some(PreviewRes {
            frequency: query.frequency,
            dates: upcoming(query.date, query.frequency, PREVIEW_COUNT),
        }),
        message: Some("Preview occurrences successfully"),
    })
}

/// Book a listing for the authenticated client, optionally as a recurring booking.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Appointments"],
    security(("bearerAuth" = [])),
    request_body = BookAppointmentReq,
    responses(
        (status = 200, description = "Booked successfully", body = StdResponse<Booking, String>),
        (status = 400, description = "Invalid request or non-contiguous slots"),
        (status = 409, description = "The time is not available")
    )
)]
async fn book(
    State(state): State<AppState>,
    Extension(client_id): Extension<Uuid>,
    Json(body): Json<BookAppointmentReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let booking =
        book_appointment(conn, client_id, body, state.config.booking.recurring_instances).await?;

    Ok(StdResponse {
        data: Some(booking),
        message: Some("Booked appointment successfully"),
    })
}

/// Reserves the slots for a booking and writes the appointment(s) in one transaction.
/// Nothing is written when any occurrence conflicts.
pub(crate) async fn book_appointment(
    conn: &mut AsyncPgConnection,
    client_id: Uuid,
    body: BookAppointmentReq,
    recurring_instances: usize,
) -> Result<Booking, AppError> {
    ensure_not_past(body.date, body.start_time, Local::now().naive_local())?;

    let booking = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let listing: ListingEntity = listings::table
                    .find(body.listing_id)
                    .filter(listings::is_active.eq(true))
                    .select(ListingEntity::as_select())
                    .get_result(conn)
                    .await?;

                if listing.provider_id == client_id {
                    return Err(AppError::BadRequest(
                        "You cannot book your own listing".into(),
                    ));
                }

                let (price, duration) = resolve_variant(&listing, body.variant.as_deref())?;
                let needed = slots_needed(duration, listing.slot_size_minutes)
                    .map_err(|err| AppError::BadRequest(err.to_string()))?;

                let anchor_slots: Vec<TimeSlotEntity> = provider_time_slots::table
                    .filter(provider_time_slots::listing_id.eq(listing.id))
                    .filter(provider_time_slots::slot_date.eq(body.date))
                    .filter(provider_time_slots::start_time.ge(body.start_time))
                    .order_by(provider_time_slots::start_time.asc())
                    .limit(needed as i64)
                    .for_update()
                    .select(TimeSlotEntity::as_select())
                    .get_results(conn)
                    .await
                    .context("Failed to lock slots")?;

                let window = validate_anchor_slots(
                    &anchor_slots,
                    body.start_time,
                    needed,
                    listing.slot_size_minutes,
                )?;

                let occurrences = if body.frequency.is_recurring() {
                    recurring_instances
                } else {
                    0
                };
                let dates = occurrence_dates(body.date, body.frequency, occurrences);
                let booked = load_booked_intervals(conn, listing.provider_id, &dates).await?;

                let dates = check_recurring_availability(
                    body.date,
                    &window,
                    body.frequency,
                    occurrences,
                    &booked,
                )
                .map_err(|conflict| AppError::Conflict(conflict.to_string()))?;

                let recurring_rule = if body.frequency.is_recurring() {
                    let rule = diesel::insert_into(recurring_rules::table)
                        .values(CreateRecurringRuleEntity {
                            provider_id: listing.provider_id,
                            client_id,
                            listing_id: listing.id,
                            frequency: body.frequency.as_str().into(),
                            day_of_week: day_of_week_index(body.date.weekday()),
                            week_of_month: (body.frequency == RecurrenceFrequency::Monthly)
                                .then(|| i32::from(week_of_month(body.date))),
                            start_date: body.date,
                            start_time: window.start,
                            end_time: window.end,
                        })
                        .returning(RecurringRuleEntity::as_returning())
                        .get_result(conn)
                        .await
                        .context("Failed to create recurring rule")?;
                    Some(rule)
                } else {
                    None
                };
                let rule_id = recurring_rule.as_ref().map(|rule| rule.id);

                let new_appointments = appointment_rows(
                    &listing,
                    client_id,
                    &dates,
                    &window,
                    &body,
                    price,
                    rule_id,
                );

                let mut created: Vec<AppointmentEntity> =
                    diesel::insert_into(appointments::table)
                        .values(&new_appointments)
                        .returning(AppointmentEntity::as_returning())
                        .get_results(conn)
                        .await
                        .context("Failed to create appointments")?;
                created.sort_by_key(|appointment| appointment.appointment_date);

                let mut created = created.into_iter();
                let appointment = created
                    .next()
                    .context("Appointment insert returned no rows")?;
                let occurrences: Vec<AppointmentEntity> = created.collect();

                let slot_ids: Vec<Uuid> = anchor_slots.iter().map(|slot| slot.id).collect();
                diesel::update(
                    provider_time_slots::table.filter(provider_time_slots::id.eq_any(&slot_ids)),
                )
                .set((
                    provider_time_slots::is_reserved.eq(true),
                    provider_time_slots::appointment_id.eq(appointment.id),
                    provider_time_slots::recurring_rule_id.eq(rule_id),
                    provider_time_slots::updated_at.eq(diesel::dsl::now),
                ))
                .execute(conn)
                .await
                .context("Failed to reserve slots")?;

                if !occurrences.is_empty() {
                    let blocks = recurring_blocks(&listing, &anchor_slots, &occurrences, rule_id);
                    block_recurring_slots(conn, &blocks).await?;
                }

                info!(
                    appointment_id = %appointment.id,
                    listing_id = %listing.id,
                    %client_id,
                    occurrences = occurrences.len(),
                    "Booked appointment"
                );

                Ok::<Booking, AppError>(Booking {
                    appointment,
                    occurrences,
                    recurring_rule,
                    price,
                    currency: listing.currency,
                })
            })
        })
        .await?;

    Ok(booking)
}

/// One pending appointment per date, each priced as a single occurrence.
fn appointment_rows(
    listing: &ListingEntity,
    client_id: Uuid,
    dates: &[NaiveDate],
    window: &TimeWindow,
    body: &BookAppointmentReq,
    price: f64,
    rule_id: Option<Uuid>,
) -> Vec<CreateAppointmentEntity> {
    dates
        .iter()
        .map(|date| CreateAppointmentEntity {
            provider_id: listing.provider_id,
            client_id,
            listing_id: listing.id,
            appointment_date: *date,
            start_time: window.start,
            end_time: window.end,
            status: AppointmentStatus::Pending.as_str().into(),
            service_variant: body.variant.clone(),
            price,
            recurring_rule_id: rule_id,
            notes: body.notes.clone(),
        })
        .collect()
}

fn ensure_not_past(date: NaiveDate, start: NaiveTime, now: NaiveDateTime) -> Result<(), AppError> {
    if date.and_time(start) < now {
        return Err(AppError::BadRequest(
            "Cannot book an appointment in the past".into(),
        ));
    }
    Ok(())
}

/// Price and duration of the chosen variant, or of the listing itself.
fn resolve_variant(listing: &ListingEntity, variant: Option<&str>) -> Result<(f64, i32), AppError> {
    let Some(name) = variant else {
        return Ok((listing.base_price, listing.duration_minutes));
    };

    let variants: Vec<ServiceVariant> = serde_json::from_value(listing.service_variants.clone())
        .context("Listing has malformed service variants")?;

    variants
        .into_iter()
        .find(|candidate| candidate.name == name)
        .map(|found| {
            (
                found.price,
                found.duration_minutes.unwrap_or(listing.duration_minutes),
            )
        })
        .ok_or_else(|| AppError::BadRequest(format!("Unknown service variant {name}")))
}

/// The slots must start at `start`, be contiguous, cover the service and be free.
fn validate_anchor_slots(
    slots: &[TimeSlotEntity],
    start: NaiveTime,
    needed: usize,
    slot_minutes: i32,
) -> Result<TimeWindow, AppError> {
    let windows: Vec<TimeWindow> = slots
        .iter()
        .map(|slot| TimeWindow::new(slot.start_time, slot.end_time))
        .collect();

    ensure_contiguous(&windows, slot_minutes)
        .map_err(|err| AppError::BadRequest(err.to_string()))?;

    let (Some(first), Some(last)) = (windows.as_slice().first(), windows.as_slice().last()) else {
        return Err(AppError::Conflict("The selected time is not available".into()));
    };
    if first.start != start || windows.len() < needed {
        return Err(AppError::Conflict(
            "Not enough consecutive slots for this service".into(),
        ));
    }
    if let Some(taken) = slots
        .iter()
        .find(|slot| !slot.is_available || slot.is_reserved)
    {
        return Err(AppError::Conflict(format!(
            "The slot {} on {} is already taken",
            TimeWindow::new(taken.start_time, taken.end_time),
            taken.slot_date
        )));
    }

    Ok(TimeWindow::new(first.start, last.end))
}

/// Active appointments and blocked or reserved slots of the provider on `dates`.
async fn load_booked_intervals(
    conn: &mut AsyncPgConnection,
    provider_id: Uuid,
    dates: &[NaiveDate],
) -> Result<Vec<BookedInterval>, AppError> {
    let taken_appointments: Vec<(NaiveDate, NaiveTime, NaiveTime)> = appointments::table
        .filter(appointments::provider_id.eq(provider_id))
        .filter(appointments::appointment_date.eq_any(dates))
        .filter(appointments::status.eq_any(AppointmentStatus::active()))
        .select((
            appointments::appointment_date,
            appointments::start_time,
            appointments::end_time,
        ))
        .get_results(conn)
        .await
        .context("Failed to get booked appointments")?;

    let taken_slots: Vec<(NaiveDate, NaiveTime, NaiveTime)> = provider_time_slots::table
        .filter(provider_time_slots::provider_id.eq(provider_id))
        .filter(provider_time_slots::slot_date.eq_any(dates))
        .filter(
            provider_time_slots::is_available
                .eq(false)
                .or(provider_time_slots::is_reserved.eq(true)),
        )
        .select((
            provider_time_slots::slot_date,
            provider_time_slots::start_time,
            provider_time_slots::end_time,
        ))
        .get_results(conn)
        .await
        .context("Failed to get blocked slots")?;

    Ok(taken_appointments
        .into_iter()
        .chain(taken_slots)
        .map(|(date, start, end)| BookedInterval::new(date, start, end))
        .collect())
}

/// Slots held for the later occurrences of a recurring booking, mirroring the anchor's slots.
fn recurring_blocks(
    listing: &ListingEntity,
    anchor_slots: &[TimeSlotEntity],
    occurrences: &[AppointmentEntity],
    rule_id: Option<Uuid>,
) -> Vec<CreateTimeSlotEntity> {
    occurrences
        .iter()
        .flat_map(|occurrence| {
            anchor_slots.iter().map(move |slot| CreateTimeSlotEntity {
                provider_id: listing.provider_id,
                listing_id: listing.id,
                slot_date: occurrence.appointment_date,
                start_time: slot.start_time,
                end_time: slot.end_time,
                is_available: false,
                is_reserved: true,
                slot_type: SlotType::RecurringBlocked.as_str().into(),
                recurring_rule_id: rule_id,
                appointment_id: Some(occurrence.id),
            })
        })
        .collect()
}

async fn block_recurring_slots(
    conn: &mut AsyncPgConnection,
    blocks: &[CreateTimeSlotEntity],
) -> Result<(), AppError> {
    diesel::insert_into(provider_time_slots::table)
        .values(blocks)
        .on_conflict((
            provider_time_slots::provider_id,
            provider_time_slots::listing_id,
            provider_time_slots::slot_date,
            provider_time_slots::start_time,
        ))
        .do_update()
        .set((
            provider_time_slots::is_available.eq(false),
            provider_time_slots::is_reserved.eq(true),
            provider_time_slots::slot_type.eq(excluded(provider_time_slots::slot_type)),
            provider_time_slots::recurring_rule_id
                .eq(excluded(provider_time_slots::recurring_rule_id)),
            provider_time_slots::appointment_id.eq(excluded(provider_time_slots::appointment_id)),
            provider_time_slots::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await
        .context("Failed to block recurring slots")?;
    Ok(())
}

/// Frees every slot held by the given appointments. Recurring blocks become regular slots.
pub(crate) async fn release_slots(
    conn: &mut AsyncPgConnection,
    appointment_ids: &[Uuid],
) -> Result<usize, AppError> {
    let released = diesel::update(
        provider_time_slots::table
            .filter(provider_time_slots::appointment_id.eq_any(appointment_ids)),
    )
    .set((
        provider_time_slots::is_available.eq(true),
        provider_time_slots::is_reserved.eq(false),
        provider_time_slots::slot_type.eq(SlotType::Generated.as_str()),
        provider_time_slots::recurring_rule_id.eq(None::<Uuid>),
        provider_time_slots::appointment_id.eq(None::<Uuid>),
        provider_time_slots::updated_at.eq(diesel::dsl::now),
    ))
    .execute(conn)
    .await
    .context("Failed to release slots")?;

    Ok(released)
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct CancelQuery {
    /// Also cancel every later occurrence of the same recurring booking.
    #[serde(default)]
    all_future: bool,
}

/// Cancel an appointment of the authenticated client and release its slots.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Appointments"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Appointment ID to cancel"),
        CancelQuery
    ),
    responses(
        (status = 200, description = "Cancelled successfully", body = StdResponse<Vec<AppointmentEntity>, String>),
        (status = 409, description = "The appointment can no longer be cancelled")
    )
)]
async fn cancel_appointment(
    Path(id): Path<Uuid>,
    Query(query): Query<CancelQuery>,
    State(state): State<AppState>,
    Extension(client_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cancelled = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let appointment: AppointmentEntity = appointments::table
                    .find(id)
                    .filter(appointments::client_id.eq(client_id))
                    .for_update()
                    .select(AppointmentEntity::as_select())
                    .get_result(conn)
                    .await?;

                let status: AppointmentStatus = appointment
                    .status
                    .parse()
                    .map_err(|err: String| anyhow::anyhow!(err))?;
                if !status.can_transition_to(AppointmentStatus::Cancelled) {
                    return Err(AppError::Conflict(format!(
                        "A {status} appointment cannot be cancelled"
                    )));
                }

                let mut ids = vec![appointment.id];
                if let (true, Some(rule_id)) = (query.all_future, appointment.recurring_rule_id) {
                    let later: Vec<Uuid> = appointments::table
                        .filter(appointments::recurring_rule_id.eq(rule_id))
                        .filter(appointments::appointment_date.gt(appointment.appointment_date))
                        .filter(appointments::status.eq_any(AppointmentStatus::active()))
                        .select(appointments::id)
                        .get_results(conn)
                        .await
                        .context("Failed to get later occurrences")?;
                    ids.extend(later);

                    diesel::update(recurring_rules::table.find(rule_id))
                        .set((
                            recurring_rules::is_active.eq(false),
                            recurring_rules::updated_at.eq(diesel::dsl::now),
                        ))
                        .execute(conn)
                        .await
                        .context("Failed to deactivate recurring rule")?;
                }

                let cancelled: Vec<AppointmentEntity> =
                    diesel::update(appointments::table.filter(appointments::id.eq_any(&ids)))
                        .set((
                            appointments::status.eq(AppointmentStatus::Cancelled.as_str()),
                            appointments::updated_at.eq(diesel::dsl::now),
                        ))
                        .returning(AppointmentEntity::as_returning())
                        .get_results(conn)
                        .await
                        .context("Failed to cancel appointments")?;

                let released = release_slots(conn, &ids).await?;
                info!(appointment_id = %id, cancelled = cancelled.len(), released, "Cancelled appointment");

                Ok::<Vec<AppointmentEntity>, AppError>(cancelled)
            })
        })
        .await?;

    Ok(StdResponse {
        data: Some(cancelled),
        message: Some("Cancelled appointment successfully"),
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn listing() -> ListingEntity {
        ListingEntity {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            title: "Dog grooming".into(),
            description: None,
            category: "pet".into(),
            base_price: 40.0,
            currency: "USD".into(),
            duration_minutes: 60,
            slot_size_minutes: 30,
            is_active: true,
            service_variants: json!([
                { "name": "Large dog", "price": 55.0, "duration_minutes": 90 },
                { "name": "Nails only", "price": 15.0 }
            ]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn slot(start: &str, end: &str, available: bool, reserved: bool) -> TimeSlotEntity {
        TimeSlotEntity {
            id: Uuid::new_v4(),
            provider_id: Uuid::nil(),
            listing_id: Uuid::nil(),
            slot_date: d("2025-10-20"),
            start_time: t(start),
            end_time: t(end),
            is_available: available,
            is_reserved: reserved,
            slot_type: SlotType::Generated.as_str().into(),
            recurring_rule_id: None,
            appointment_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn past_bookings_are_rejected() {
        let now = d("2025-10-20").and_time(t("10:00"));
        assert!(ensure_not_past(d("2025-10-20"), t("09:00"), now).is_err());
        assert!(ensure_not_past(d("2025-10-19"), t("12:00"), now).is_err());
        assert!(ensure_not_past(d("2025-10-20"), t("10:30"), now).is_ok());
    }

    #[test]
    fn variants_override_price_and_duration() {
        let listing = listing();
        assert_eq!(resolve_variant(&listing, None).unwrap(), (40.0, 60));
        assert_eq!(resolve_variant(&listing, Some("Large dog")).unwrap(), (55.0, 90));
        assert_eq!(resolve_variant(&listing, Some("Nails only")).unwrap(), (15.0, 60));
        assert!(matches!(
            resolve_variant(&listing, Some("Cat")),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn every_occurrence_keeps_the_variant_and_its_price() {
        let listing = listing();
        let body = BookAppointmentReq {
            listing_id: listing.id,
            date: d("2025-10-20"),
            start_time: t("08:00"),
            frequency: RecurrenceFrequency::Weekly,
            variant: Some("Large dog".into()),
            notes: None,
        };
        let (price, _) = resolve_variant(&listing, body.variant.as_deref()).unwrap();
        let dates = [d("2025-10-20"), d("2025-10-27")];
        let window = TimeWindow::new(t("08:00"), t("09:30"));

        let rows = appointment_rows(&listing, Uuid::new_v4(), &dates, &window, &body, price, None);

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.price == 55.0));
        assert!(rows.iter().all(|row| row.service_variant.as_deref() == Some("Large dog")));
        assert_eq!(rows[1].appointment_date, d("2025-10-27"));
        assert_eq!(rows[1].end_time, t("09:30"));
    }

    #[test]
    fn contiguous_free_slots_form_the_booking_window() {
        let slots = [slot("08:00", "08:30", true, false), slot("08:30", "09:00", true, false)];
        let window = validate_anchor_slots(&slots, t("08:00"), 2, 30).unwrap();
        assert_eq!(window, TimeWindow::new(t("08:00"), t("09:00")));
    }

    #[test]
    fn gap_between_slots_is_a_bad_request() {
        let slots = [slot("08:00", "08:30", true, false), slot("09:00", "09:30", true, false)];
        match validate_anchor_slots(&slots, t("08:00"), 2, 30) {
            Err(AppError::BadRequest(message)) => {
                assert!(message.contains("08:00-08:30"));
                assert!(message.contains("09:00-09:30"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_or_taken_slots_conflict() {
        let short = [slot("08:00", "08:30", true, false)];
        assert!(matches!(
            validate_anchor_slots(&short, t("08:00"), 2, 30),
            Err(AppError::Conflict(_))
        ));

        let late_start = [slot("08:30", "09:00", true, false)];
        assert!(matches!(
            validate_anchor_slots(&late_start, t("08:00"), 1, 30),
            Err(AppError::Conflict(_))
        ));

        let reserved = [slot("08:00", "08:30", true, false), slot("08:30", "09:00", true, true)];
        assert!(matches!(
            validate_anchor_slots(&reserved, t("08:00"), 2, 30),
            Err(AppError::Conflict(_))
        ));

        let blocked = [slot("08:00", "08:30", false, false)];
        assert!(matches!(
            validate_anchor_slots(&blocked, t("08:00"), 1, 30),
            Err(AppError::Conflict(_))
        ));

        assert!(matches!(
            validate_anchor_slots(&[], t("08:00"), 1, 30),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn recurring_blocks_mirror_anchor_slots_on_each_occurrence() {
        let listing = listing();
        let anchor_slots = [slot("08:00", "08:30", true, false), slot("08:30", "09:00", true, false)];
        let rule_id = Some(Uuid::new_v4());
        let occurrences: Vec<AppointmentEntity> = ["2025-10-27", "2025-11-03"]
            .into_iter()
            .map(|date| AppointmentEntity {
                id: Uuid::new_v4(),
                provider_id: listing.provider_id,
                client_id: Uuid::new_v4(),
                listing_id: listing.id,
                appointment_date: d(date),
                start_time: t("08:00"),
                end_time: t("09:00"),
                status: "pending".into(),
                service_variant: None,
                price: 40.0,
                recurring_rule_id: rule_id,
                notes: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .collect();

        let blocks = recurring_blocks(&listing, &anchor_slots, &occurrences, rule_id);

        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|block| block.is_reserved && !block.is_available));
        assert!(blocks.iter().all(|block| block.slot_type == "recurring_blocked"));
        assert_eq!(blocks[2].slot_date, d("2025-11-03"));
        assert_eq!(blocks[2].appointment_id, Some(occurrences[1].id));
    }
}
