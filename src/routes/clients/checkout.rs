//! Checkout: book, create a payment intent, confirm it.
//!
//! A gateway outage keeps the appointment so the client can pay later through
//! `/{appointment_id}/pay`. A declined payment undoes the booking.

use std::collections::{HashMap, HashSet};

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    api::payment_gateway::{
        BillingDetails, CardDetails, CreateIntentRequest, GatewayError, PaymentGateway,
        PaymentMethodDetails, PaymentStatus, to_minor_units,
    },
    booking::status::AppointmentStatus,
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::{AppointmentEntity, CreatePaymentEntity, PaymentEntity},
    routes::clients::appointments::{BookAppointmentReq, Booking, book_appointment, release_slots},
    schema::{appointments, listings, payments, recurring_rules},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/clients/checkout",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(checkout))
            .routes(utoipa_axum::routes!(pay_appointment))
            .route_layer(axum::middleware::from_fn(
                middleware::clients_authorization,
            )),
    )
}

#[derive(Deserialize, ToSchema)]
struct CheckoutReq {
    booking: BookAppointmentReq,
    card: CardDetails,
    billing: BillingDetails,
}

#[derive(Serialize, ToSchema)]
struct CheckoutRes {
    booking: Booking,
    payment: PaymentEntity,
}

#[derive(Deserialize, ToSchema)]
struct PayReq {
    card: CardDetails,
    billing: BillingDetails,
}

/// What happens to the booking when the payment cannot be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureDisposition {
    /// Keep the appointment and the pending payment; the client retries later.
    Preserve,
    /// Delete the appointment(s), release the slots, fail the payment.
    Rollback,
}

pub(crate) fn failure_disposition(err: &GatewayError) -> FailureDisposition {
    match err {
        GatewayError::Unavailable(_) => FailureDisposition::Preserve,
        GatewayError::Rejected { .. } => FailureDisposition::Rollback,
    }
}

/// Book and pay in one step.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Checkout"],
    security(("bearerAuth" = [])),
    request_body = CheckoutReq,
    responses(
        (status = 200, description = "Booked and paid", body = StdResponse<CheckoutRes, String>),
        (status = 402, description = "Payment declined; the booking was undone"),
        (status = 409, description = "The time is not available"),
        (status = 503, description = "Payment service unavailable; the appointment was kept")
    )
)]
async fn checkout(
    State(state): State<AppState>,
    Extension(client_id): Extension<Uuid>,
    Json(body): Json<CheckoutReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let booking = book_appointment(
        conn,
        client_id,
        body.booking,
        state.config.booking.recurring_instances,
    )
    .await?;

    let payment: PaymentEntity = diesel::insert_into(payments::table)
        .values(CreatePaymentEntity {
            appointment_id: Some(booking.appointment.id),
            client_id,
            amount: booking.price,
            currency: booking.currency.clone(),
            provider: state.payment_gateway.provider_name().to_string(),
            status: PaymentStatus::Pending.as_str().into(),
        })
        .returning(PaymentEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create payment")?;

    let method = PaymentMethodDetails::card(body.card, body.billing);
    let payment = settle_payment(
        conn,
        state.payment_gateway.as_ref(),
        payment,
        &booking.appointment,
        method,
    )
    .await?;

    Ok(StdResponse {
        data: Some(CheckoutRes { booking, payment }),
        message: Some("Checkout completed successfully"),
    })
}

/// Pay for an appointment that was kept after a gateway outage.
#[utoipa::path(
    post,
    path = "/{appointment_id}/pay",
    tags = ["Checkout"],
    security(("bearerAuth" = [])),
    params(
        ("appointment_id" = Uuid, Path, description = "Appointment to pay for")
    ),
    request_body = PayReq,
    responses(
        (status = 200, description = "Paid", body = StdResponse<PaymentEntity, String>),
        (status = 402, description = "Payment declined; the booking was undone"),
        (status = 409, description = "The appointment is already paid or no longer pending"),
        (status = 503, description = "Payment service unavailable")
    )
)]
async fn pay_appointment(
    Path(appointment_id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(client_id): Extension<Uuid>,
    Json(body): Json<PayReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let appointment: AppointmentEntity = appointments::table
        .find(appointment_id)
        .filter(appointments::client_id.eq(client_id))
        .select(AppointmentEntity::as_select())
        .get_result(conn)
        .await?;

    if appointment.status != AppointmentStatus::Pending.as_str() {
        return Err(AppError::Conflict(format!(
            "A {} appointment cannot be paid",
            appointment.status
        )));
    }

    let existing: Vec<PaymentEntity> = payments::table
        .filter(payments::appointment_id.eq(appointment.id))
        .order_by(payments::created_at.desc())
        .select(PaymentEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get payments")?;

    if existing.iter().any(|payment| is_settled(&payment.status)) {
        return Err(AppError::Conflict("The appointment is already paid".into()));
    }

    let payment = match existing
        .into_iter()
        .find(|payment| payment.status == PaymentStatus::Pending.as_str())
    {
        Some(payment) => payment,
        None => {
            let currency: String = listings::table
                .find(appointment.listing_id)
                .select(listings::currency)
                .get_result(conn)
                .await?;

            diesel::insert_into(payments::table)
                .values(retry_payment(
                    &appointment,
                    currency,
                    state.payment_gateway.provider_name(),
                ))
                .returning(PaymentEntity::as_returning())
                .get_result(conn)
                .await
                .context("Failed to create payment")?
        }
    };

    let method = PaymentMethodDetails::card(body.card, body.billing);
    let payment = settle_payment(
        conn,
        state.payment_gateway.as_ref(),
        payment,
        &appointment,
        method,
    )
    .await?;

    Ok(StdResponse {
        data: Some(payment),
        message: Some("Payment completed successfully"),
    })
}

/// New pending payment for a kept appointment, charging the price it was booked at.
fn retry_payment(appointment: &AppointmentEntity, currency: String, provider: &str) -> CreatePaymentEntity {
    CreatePaymentEntity {
        appointment_id: Some(appointment.id),
        client_id: appointment.client_id,
        amount: appointment.price,
        currency,
        provider: provider.to_string(),
        status: PaymentStatus::Pending.as_str().into(),
    }
}

fn is_settled(status: &str) -> bool {
    settled_statuses().contains(&status)
}

fn settled_statuses() -> [&'static str; 2] {
    [PaymentStatus::Paid.as_str(), PaymentStatus::Authorized.as_str()]
}

pub(crate) fn intent_request(
    payment: &PaymentEntity,
    appointment: &AppointmentEntity,
) -> CreateIntentRequest {
    CreateIntentRequest {
        amount: to_minor_units(payment.amount),
        currency: payment.currency.clone(),
        description: format!(
            "Appointment on {} at {}",
            appointment.appointment_date,
            appointment.start_time.format("%H:%M")
        ),
        metadata: HashMap::from([
            ("appointment_id".to_string(), appointment.id.to_string()),
            ("payment_id".to_string(), payment.id.to_string()),
            ("client_id".to_string(), payment.client_id.to_string()),
        ]),
    }
}

/// What the gateway said about one payment.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PaymentAttempt {
    /// Intent created or reused by the attempt.
    pub intent_id: Option<String>,
    pub result: Result<PaymentStatus, GatewayError>,
}

/// Creates the intent unless the payment already has one, then confirms it.
/// An intent that confirms into a failed status counts as a decline.
pub(crate) async fn attempt_payment(
    gateway: &dyn PaymentGateway,
    payment: &PaymentEntity,
    appointment: &AppointmentEntity,
    method: PaymentMethodDetails,
) -> PaymentAttempt {
    let intent_id = match &payment.provider_ref {
        Some(intent_id) => intent_id.clone(),
        None => match gateway
            .create_payment_intent(intent_request(payment, appointment))
            .await
        {
            Ok(intent) => intent.id,
            Err(err) => {
                return PaymentAttempt {
                    intent_id: None,
                    result: Err(err),
                };
            }
        },
    };

    let result = match gateway.confirm_payment_intent(intent_id.clone(), method).await {
        Ok(intent) => match PaymentStatus::from_intent_status(&intent.status) {
            PaymentStatus::Failed => Err(GatewayError::Rejected {
                status: 402,
                message: format!("The payment ended as {}", intent.status),
            }),
            status => Ok(status),
        },
        Err(err) => Err(err),
    };

    PaymentAttempt {
        intent_id: Some(intent_id),
        result,
    }
}

/// Payment row changes for an attempt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PaymentUpdate {
    pub status: PaymentStatus,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub undo_booking: bool,
}

pub(crate) fn payment_update(attempt: &PaymentAttempt) -> PaymentUpdate {
    let provider_ref = attempt.intent_id.clone();
    match &attempt.result {
        Ok(status) => PaymentUpdate {
            status: *status,
            provider_ref,
            failure_reason: None,
            undo_booking: false,
        },
        Err(err) => match failure_disposition(err) {
            FailureDisposition::Preserve => PaymentUpdate {
                status: PaymentStatus::Pending,
                provider_ref,
                failure_reason: Some(err.to_string()),
                undo_booking: false,
            },
            FailureDisposition::Rollback => PaymentUpdate {
                status: PaymentStatus::Failed,
                provider_ref,
                failure_reason: Some(err.to_string()),
                undo_booking: true,
            },
        },
    }
}

/// Appointments removed when the payment for `paying` is declined: `paying` itself and,
/// while no occurrence of its series is paid, the later pending occurrences. Earlier,
/// confirmed or paid occurrences are never touched.
pub(crate) fn undo_targets(
    paying: &AppointmentEntity,
    series: &[AppointmentEntity],
    settled: &HashSet<Uuid>,
) -> Vec<Uuid> {
    let mut targets = vec![paying.id];
    if series.iter().any(|member| settled.contains(&member.id)) {
        return targets;
    }
    targets.extend(
        series
            .iter()
            .filter(|member| {
                member.id != paying.id
                    && member.appointment_date > paying.appointment_date
                    && member.status == AppointmentStatus::Pending.as_str()
            })
            .map(|member| member.id),
    );
    targets
}

/// Runs the attempt and records its outcome. A decline undoes the booking.
async fn settle_payment(
    conn: &mut AsyncPgConnection,
    gateway: &dyn PaymentGateway,
    payment: PaymentEntity,
    appointment: &AppointmentEntity,
    method: PaymentMethodDetails,
) -> Result<PaymentEntity, AppError> {
    let attempt = attempt_payment(gateway, &payment, appointment, method).await;
    let update = payment_update(&attempt);

    if update.undo_booking {
        let reason = update.failure_reason.clone().unwrap_or_default();
        warn!(payment_id = %payment.id, appointment_id = %appointment.id, %reason, "Payment rejected, undoing booking");
        undo_booking(conn, payment.id, appointment, update).await?;
        return Err(AppError::PaymentDeclined(reason));
    }

    let recorded: PaymentEntity = diesel::update(payments::table.find(payment.id))
        .set((
            payments::status.eq(update.status.as_str()),
            payments::provider_ref.eq(&update.provider_ref),
            payments::failure_reason.eq(&update.failure_reason),
            payments::updated_at.eq(diesel::dsl::now),
        ))
        .returning(PaymentEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to update payment")?;

    match attempt.result {
        Ok(_) => {
            info!(payment_id = %recorded.id, appointment_id = %appointment.id, status = %recorded.status, "Payment settled");
            Ok(recorded)
        }
        Err(err) => {
            warn!(payment_id = %recorded.id, appointment_id = %appointment.id, error = %err, "Payment gateway unavailable, keeping appointment");
            Err(AppError::ServiceUnavailable(format!(
                "The payment service is unavailable. Appointment {} was kept; please retry the payment later",
                appointment.id
            )))
        }
    }
}

/// Fails the payment, then releases the slots of and deletes the appointments picked by
/// [`undo_targets`]. The recurring rule goes once none of its appointments remain.
async fn undo_booking(
    conn: &mut AsyncPgConnection,
    payment_id: Uuid,
    appointment: &AppointmentEntity,
    update: PaymentUpdate,
) -> Result<(), AppError> {
    let paying = appointment.clone();

    conn.transaction(move |conn| {
        Box::pin(async move {
            let series: Vec<AppointmentEntity> = match paying.recurring_rule_id {
                Some(rule_id) => appointments::table
                    .filter(appointments::recurring_rule_id.eq(rule_id))
                    .for_update()
                    .select(AppointmentEntity::as_select())
                    .get_results(conn)
                    .await
                    .context("Failed to get occurrences")?,
                None => Vec::new(),
            };
            let series_ids: Vec<Uuid> = series.iter().map(|member| member.id).collect();

            let paid: Vec<Option<Uuid>> = payments::table
                .filter(payments::appointment_id.eq_any(&series_ids))
                .filter(payments::status.eq_any(settled_statuses()))
                .select(payments::appointment_id)
                .get_results(conn)
                .await
                .context("Failed to get settled payments")?;
            let settled: HashSet<Uuid> = paid.into_iter().flatten().collect();

            let ids = undo_targets(&paying, &series, &settled);

            diesel::update(payments::table.find(payment_id))
                .set((
                    payments::status.eq(update.status.as_str()),
                    payments::provider_ref.eq(&update.provider_ref),
                    payments::failure_reason.eq(&update.failure_reason),
                    payments::updated_at.eq(diesel::dsl::now),
                ))
                .execute(conn)
                .await
                .context("Failed to fail payment")?;

            release_slots(conn, &ids).await?;

            diesel::delete(appointments::table.filter(appointments::id.eq_any(&ids)))
                .execute(conn)
                .await
                .context("Failed to delete appointments")?;

            if let (Some(rule_id), true) = (paying.recurring_rule_id, ids.len() == series.len()) {
                diesel::delete(recurring_rules::table.find(rule_id))
                    .execute(conn)
                    .await
                    .context("Failed to delete recurring rule")?;
            }

            info!(appointment_id = %paying.id, removed = ids.len(), "Booking undone after declined payment");
            Ok::<(), AppError>(())
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex as StdMutex,
        atomic::{AtomicUsize, Ordering},
    };

    use chrono::{NaiveDate, NaiveTime, Utc};
    use futures::future::BoxFuture;

    use super::*;
    use crate::api::payment_gateway::PaymentIntent;

    fn appointment_on(date: &str, status: AppointmentStatus, rule_id: Option<Uuid>) -> AppointmentEntity {
        AppointmentEntity {
            id: Uuid::new_v4(),
            provider_id: Uuid::nil(),
            client_id: Uuid::nil(),
            listing_id: Uuid::nil(),
            appointment_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            status: status.as_str().into(),
            service_variant: None,
            price: 49.99,
            recurring_rule_id: rule_id,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn pending_payment(appointment: &AppointmentEntity, provider_ref: Option<&str>) -> PaymentEntity {
        PaymentEntity {
            id: Uuid::new_v4(),
            appointment_id: Some(appointment.id),
            client_id: appointment.client_id,
            amount: appointment.price,
            currency: "USD".into(),
            status: "PENDING".into(),
            provider: "onvopay".into(),
            provider_ref: provider_ref.map(str::to_string),
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn intent(id: &str, status: &str) -> PaymentIntent {
        PaymentIntent {
            id: id.into(),
            status: status.into(),
            amount: Some(4999),
        }
    }

    fn card() -> PaymentMethodDetails {
        PaymentMethodDetails::card(
            CardDetails {
                number: "4000000000000002".into(),
                exp_month: 1,
                exp_year: 2031,
                cvv: "321".into(),
                holder_name: "Luis Vega".into(),
            },
            BillingDetails {
                name: "Luis Vega".into(),
                email: "luis@example.com".into(),
                phone: None,
                address: None,
            },
        )
    }

    struct FakeGateway {
        create: Result<PaymentIntent, GatewayError>,
        confirm: Result<PaymentIntent, GatewayError>,
        created: AtomicUsize,
        confirmed: StdMutex<Vec<String>>,
    }

    impl FakeGateway {
        fn new(
            create: Result<PaymentIntent, GatewayError>,
            confirm: Result<PaymentIntent, GatewayError>,
        ) -> Self {
            Self {
                create,
                confirm,
                created: AtomicUsize::new(0),
                confirmed: StdMutex::new(Vec::new()),
            }
        }
    }

    impl PaymentGateway for FakeGateway {
        fn provider_name(&self) -> &str {
            "fake"
        }

        fn create_payment_intent(
            &self,
            _request: CreateIntentRequest,
        ) -> BoxFuture<'_, Result<PaymentIntent, GatewayError>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            let result = self.create.clone();
            Box::pin(async move { result })
        }

        fn confirm_payment_intent(
            &self,
            intent_id: String,
            _method: PaymentMethodDetails,
        ) -> BoxFuture<'_, Result<PaymentIntent, GatewayError>> {
            self.confirmed.lock().unwrap().push(intent_id);
            let result = self.confirm.clone();
            Box::pin(async move { result })
        }
    }

    fn declined() -> GatewayError {
        GatewayError::Rejected {
            status: 402,
            message: "Card declined".into(),
        }
    }

    #[test]
    fn outages_preserve_and_rejections_roll_back() {
        assert_eq!(
            failure_disposition(&GatewayError::Unavailable("maintenance".into())),
            FailureDisposition::Preserve
        );
        assert_eq!(failure_disposition(&declined()), FailureDisposition::Rollback);
    }

    #[test]
    fn only_paid_or_authorized_payments_are_settled() {
        assert!(is_settled("PAID"));
        assert!(is_settled("AUTHORIZED"));
        assert!(!is_settled("PENDING"));
        assert!(!is_settled("FAILED"));
    }

    #[test]
    fn intent_request_charges_minor_units_and_tags_the_booking() {
        let appointment = appointment_on("2025-10-20", AppointmentStatus::Pending, None);
        let payment = pending_payment(&appointment, None);

        let request = intent_request(&payment, &appointment);

        assert_eq!(request.amount, 4999);
        assert_eq!(request.currency, "USD");
        assert_eq!(request.description, "Appointment on 2025-10-20 at 08:00");
        assert_eq!(
            request.metadata.get("appointment_id"),
            Some(&appointment.id.to_string())
        );
        assert_eq!(request.metadata.get("payment_id"), Some(&payment.id.to_string()));
    }

    #[test]
    fn retry_payment_charges_the_booked_variant_price() {
        let appointment = AppointmentEntity {
            service_variant: Some("Large dog".into()),
            price: 55.0,
            ..appointment_on("2025-10-20", AppointmentStatus::Pending, None)
        };

        let payment = retry_payment(&appointment, "USD".into(), "onvopay");

        assert_eq!(payment.amount, 55.0);
        assert_eq!(payment.appointment_id, Some(appointment.id));
        assert_eq!(payment.status, "PENDING");
    }

    #[tokio::test]
    async fn successful_confirmation_marks_payment_paid() {
        let appointment = appointment_on("2025-10-20", AppointmentStatus::Pending, None);
        let payment = pending_payment(&appointment, None);
        let gateway = FakeGateway::new(
            Ok(intent("pi_1", "requires_confirmation")),
            Ok(intent("pi_1", "succeeded")),
        );

        let attempt = attempt_payment(&gateway, &payment, &appointment, card()).await;
        let update = payment_update(&attempt);

        assert_eq!(
            update,
            PaymentUpdate {
                status: PaymentStatus::Paid,
                provider_ref: Some("pi_1".into()),
                failure_reason: None,
                undo_booking: false,
            }
        );
    }

    #[tokio::test]
    async fn outage_keeps_booking_and_records_reason() {
        let appointment = appointment_on("2025-10-20", AppointmentStatus::Pending, None);
        let payment = pending_payment(&appointment, None);
        let gateway = FakeGateway::new(
            Ok(intent("pi_2", "requires_confirmation")),
            Err(GatewayError::Unavailable("gateway answered 503".into())),
        );

        let attempt = attempt_payment(&gateway, &payment, &appointment, card()).await;
        let update = payment_update(&attempt);

        assert_eq!(update.status, PaymentStatus::Pending);
        assert!(!update.undo_booking);
        assert_eq!(update.provider_ref.as_deref(), Some("pi_2"));
        assert!(update.failure_reason.unwrap().contains("gateway answered 503"));
    }

    #[tokio::test]
    async fn outage_before_intent_leaves_no_reference() {
        let appointment = appointment_on("2025-10-20", AppointmentStatus::Pending, None);
        let payment = pending_payment(&appointment, None);
        let gateway = FakeGateway::new(
            Err(GatewayError::Unavailable("connection refused".into())),
            Ok(intent("unused", "succeeded")),
        );

        let attempt = attempt_payment(&gateway, &payment, &appointment, card()).await;

        assert_eq!(attempt.intent_id, None);
        assert!(gateway.confirmed.lock().unwrap().is_empty());
        assert!(!payment_update(&attempt).undo_booking);
    }

    #[tokio::test]
    async fn decline_fails_payment_and_undoes_booking() {
        let appointment = appointment_on("2025-10-20", AppointmentStatus::Pending, None);
        let payment = pending_payment(&appointment, None);
        let gateway = FakeGateway::new(Ok(intent("pi_3", "requires_confirmation")), Err(declined()));

        let attempt = attempt_payment(&gateway, &payment, &appointment, card()).await;
        let update = payment_update(&attempt);

        assert_eq!(update.status, PaymentStatus::Failed);
        assert!(update.undo_booking);
        assert_eq!(update.failure_reason.as_deref(), Some("Card declined"));
    }

    #[tokio::test]
    async fn intent_confirming_into_failure_is_a_decline() {
        let appointment = appointment_on("2025-10-20", AppointmentStatus::Pending, None);
        let payment = pending_payment(&appointment, None);
        let gateway = FakeGateway::new(
            Ok(intent("pi_4", "requires_confirmation")),
            Ok(intent("pi_4", "requires_payment_method")),
        );

        let attempt = attempt_payment(&gateway, &payment, &appointment, card()).await;
        let update = payment_update(&attempt);

        assert!(matches!(attempt.result, Err(GatewayError::Rejected { status: 402, .. })));
        assert_eq!(update.status, PaymentStatus::Failed);
        assert!(update.undo_booking);
    }

    #[tokio::test]
    async fn retry_reuses_the_stored_intent() {
        let appointment = appointment_on("2025-10-20", AppointmentStatus::Pending, None);
        let payment = pending_payment(&appointment, Some("pi_kept"));
        let gateway = FakeGateway::new(
            Ok(intent("pi_new", "requires_confirmation")),
            Ok(intent("pi_kept", "succeeded")),
        );

        let attempt = attempt_payment(&gateway, &payment, &appointment, card()).await;

        assert_eq!(AtomicUsize::load(&gateway.created, Ordering::SeqCst), 0);
        assert_eq!(*gateway.confirmed.lock().unwrap(), vec!["pi_kept".to_string()]);
        assert_eq!(attempt.result, Ok(PaymentStatus::Paid));
    }

    #[test]
    fn declined_checkout_removes_the_whole_unpaid_series() {
        let rule = Some(Uuid::new_v4());
        let series: Vec<AppointmentEntity> = ["2025-10-20", "2025-10-27", "2025-11-03"]
            .into_iter()
            .map(|date| appointment_on(date, AppointmentStatus::Pending, rule))
            .collect();

        let targets = undo_targets(&series[0], &series, &HashSet::new());

        assert_eq!(targets, series.iter().map(|a| a.id).collect::<Vec<_>>());
    }

    #[test]
    fn declined_later_payment_keeps_paid_anchor_and_other_occurrences() {
        let rule = Some(Uuid::new_v4());
        let series: Vec<AppointmentEntity> = ["2025-10-20", "2025-10-27", "2025-11-03"]
            .into_iter()
            .map(|date| appointment_on(date, AppointmentStatus::Pending, rule))
            .collect();
        let settled = HashSet::from([series[0].id]);

        let targets = undo_targets(&series[1], &series, &settled);

        assert_eq!(targets, vec![series[1].id]);
    }

    #[test]
    fn undo_skips_earlier_and_confirmed_occurrences() {
        let rule = Some(Uuid::new_v4());
        let earlier = appointment_on("2025-10-20", AppointmentStatus::Pending, rule);
        let paying = appointment_on("2025-10-27", AppointmentStatus::Pending, rule);
        let confirmed = appointment_on("2025-11-03", AppointmentStatus::Confirmed, rule);
        let later = appointment_on("2025-11-10", AppointmentStatus::Pending, rule);
        let series = vec![earlier, paying.clone(), confirmed, later.clone()];

        let targets = undo_targets(&paying, &series, &HashSet::new());

        assert_eq!(targets, vec![paying.id, later.id]);
    }

    #[test]
    fn single_appointment_undo_targets_only_itself() {
        let appointment = appointment_on("2025-10-20", AppointmentStatus::Pending, None);
        assert_eq!(undo_targets(&appointment, &[], &HashSet::new()), vec![appointment.id]);
    }
}
