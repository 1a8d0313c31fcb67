use std::{collections::HashMap, fmt, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::core::config::PaymentsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
        }
    }

    /// Maps a gateway payment-intent status onto ours.
    pub fn from_intent_status(status: &str) -> Self {
        match status {
            "succeeded" => PaymentStatus::Paid,
            "requires_capture" => PaymentStatus::Authorized,
            "canceled" | "failed" | "requires_payment_method" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Transient: outages, maintenance pages, exhausted retries. Callers keep their records.
    #[error("Payment service unavailable: {0}")]
    Unavailable(String),

    /// The gateway refused the operation (declined card, invalid data).
    #[error("{message}")]
    Rejected { status: u16, message: String },
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    /// Amount in minor units (cents).
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub amount: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    pub number: String,
    pub exp_month: u32,
    pub exp_year: i32,
    pub cvv: String,
    pub holder_name: String,
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last4 = self.number.get(self.number.len().saturating_sub(4)..).unwrap_or("");
        f.debug_struct("CardDetails")
            .field("number", &format_args!("**** {last4}"))
            .field("exp_month", &self.exp_month)
            .field("exp_year", &self.exp_year)
            .field("cvv", &"***")
            .field("holder_name", &self.holder_name)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillingDetails {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodDetails {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub card: CardDetails,
    pub billing: BillingDetails,
}

impl PaymentMethodDetails {
    pub fn card(card: CardDetails, billing: BillingDetails) -> Self {
        Self {
            kind: "card",
            card,
            billing,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmIntentRequest {
    payment_method: PaymentMethodDetails,
}

pub trait PaymentGateway: Send + Sync {
    fn provider_name(&self) -> &str;

    fn create_payment_intent(
        &self,
        request: CreateIntentRequest,
    ) -> BoxFuture<'_, Result<PaymentIntent, GatewayError>>;

    fn confirm_payment_intent(
        &self,
        intent_id: String,
        method: PaymentMethodDetails,
    ) -> BoxFuture<'_, Result<PaymentIntent, GatewayError>>;
}

/// HTTP client for the payment gateway with retry on transient failures.
#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    base_url: String,
    secret_key: String,
    provider_name: String,
    max_retries: u32,
    base_backoff: Duration,
}

impl GatewayClient {
    pub fn new(http: Client, config: &PaymentsConfig) -> Self {
        Self {
            http,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            provider_name: config.provider_name.clone(),
            max_retries: config.max_retries,
            base_backoff: config.retry_backoff,
        }
    }

    fn backoff_delay(&self, retry_number: u32) -> Duration {
        let shift = retry_number.saturating_sub(1).min(8);
        self.base_backoff.saturating_mul(1u32 << shift)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let attempts = self.max_retries + 1;
        // Same key on every attempt so a retried create cannot charge twice.
        let idempotency_key = Uuid::new_v4().to_string();
        let mut last_failure = String::from("no attempt was made");

        for attempt in 1..=attempts {
            debug!(attempt, %url, "Calling payment gateway");

            let result = self
                .http
                .post(&url)
                .bearer_auth(&self.secret_key)
                .header("Idempotency-Key", &idempotency_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    let body = match response.text().await {
                        Ok(body) => body,
                        Err(err) => {
                            last_failure = format!("failed to read response body: {err}");
                            if attempt < attempts {
                                self.sleep_with_backoff(attempt).await;
                                continue;
                            }
                            break;
                        }
                    };

                    if is_transient_status(status) {
                        warn!(attempt, %url, %status, "Payment gateway answered with a transient error");
                        last_failure = format!("gateway answered {status}");
                        if attempt < attempts {
                            self.sleep_with_backoff(attempt).await;
                            continue;
                        }
                        break;
                    }

                    return classify_response(status, &body);
                }
                Err(err) => {
                    warn!(attempt, %url, error = %err, "Payment gateway request failed");
                    last_failure = err.to_string();
                    if attempt < attempts && should_retry_error(&err) {
                        self.sleep_with_backoff(attempt).await;
                        continue;
                    }
                    break;
                }
            }
        }

        Err(GatewayError::Unavailable(last_failure))
    }

    async fn sleep_with_backoff(&self, retry_number: u32) {
        let delay = self.backoff_delay(retry_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl PaymentGateway for GatewayClient {
    fn provider_name(&self) -> &str {
        &self.provider_name
    }

    fn create_payment_intent(
        &self,
        request: CreateIntentRequest,
    ) -> BoxFuture<'_, Result<PaymentIntent, GatewayError>> {
        Box::pin(async move { self.post_json("/v1/payment-intents", &request).await })
    }

    fn confirm_payment_intent(
        &self,
        intent_id: String,
        method: PaymentMethodDetails,
    ) -> BoxFuture<'_, Result<PaymentIntent, GatewayError>> {
        Box::pin(async move {
            let body = ConfirmIntentRequest {
                payment_method: method,
            };
            self.post_json(&format!("/v1/payment-intents/{intent_id}/confirm"), &body)
                .await
        })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Only consulted for bodies that are not JSON.
fn looks_like_maintenance(body: &str) -> bool {
    let trimmed = body.trim_start();
    trimmed.starts_with('<') || trimmed.to_ascii_lowercase().contains("maintenance")
}

fn classify_response<R: DeserializeOwned>(status: StatusCode, body: &str) -> Result<R, GatewayError> {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        let what = if looks_like_maintenance(body) {
            "a maintenance page"
        } else {
            "a non-JSON response"
        };
        return Err(GatewayError::Unavailable(format!(
            "gateway returned {what} ({status})"
        )));
    };

    if status.is_success() {
        return serde_json::from_value(json).map_err(|err| {
            GatewayError::Unavailable(format!("unexpected gateway payload: {err}"))
        });
    }

    Err(GatewayError::Rejected {
        status: status.as_u16(),
        message: extract_message(&json).unwrap_or_else(|| format!("gateway answered {status}")),
    })
}

fn extract_message(json: &Value) -> Option<String> {
    match json.get("message")? {
        Value::String(message) => Some(message.clone()),
        Value::Array(messages) => Some(
            messages
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        _ => None,
    }
}

/// Converts a decimal price into minor units.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> GatewayClient {
        GatewayClient::new(
            Client::new(),
            &PaymentsConfig {
                gateway_url: server.uri(),
                secret_key: "sk_test".into(),
                provider_name: "onvopay".into(),
                max_retries: 2,
                retry_backoff: Duration::from_millis(1),
                request_timeout: Duration::from_secs(5),
            },
        )
    }

    fn intent_request() -> CreateIntentRequest {
        CreateIntentRequest {
            amount: 2500,
            currency: "USD".into(),
            description: "Dog walking".into(),
            metadata: HashMap::new(),
        }
    }

    fn card() -> PaymentMethodDetails {
        PaymentMethodDetails::card(
            CardDetails {
                number: "4242424242424242".into(),
                exp_month: 12,
                exp_year: 2030,
                cvv: "123".into(),
                holder_name: "Ana Mora".into(),
            },
            BillingDetails {
                name: "Ana Mora".into(),
                email: "ana@example.com".into(),
                phone: None,
                address: None,
            },
        )
    }

    #[tokio::test]
    async fn creates_intent_with_auth_and_idempotency_key() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/payment-intents"))
            .and(header("Authorization", "Bearer sk_test"))
            .and(header_exists("Idempotency-Key"))
            .and(body_partial_json(json!({ "amount": 2500, "currency": "USD" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pi_123",
                "status": "requires_confirmation",
                "amount": 2500
            })))
            .expect(1)
            .mount(&server)
            .await;

        let intent = client(&server)
            .create_payment_intent(intent_request())
            .await
            .unwrap();
        assert_eq!(intent.id, "pi_123");
        assert_eq!(
            PaymentStatus::from_intent_status(&intent.status),
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/payment-intents"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/payment-intents"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pi_retry",
                "status": "requires_confirmation"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let intent = client(&server)
            .create_payment_intent(intent_request())
            .await
            .unwrap();
        assert_eq!(intent.id, "pi_retry");
    }

    #[tokio::test]
    async fn gives_up_after_two_retries() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/payment-intents"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server)
            .create_payment_intent(intent_request())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    #[tokio::test]
    async fn maintenance_page_is_unavailable_not_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/payment-intents"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body>Down for maintenance</body></html>"),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .create_payment_intent(intent_request())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    #[tokio::test]
    async fn json_success_mentioning_maintenance_is_accepted() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/payment-intents"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pi_ok",
                "status": "requires_confirmation",
                "description": "Garden maintenance"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let intent = client(&server)
            .create_payment_intent(intent_request())
            .await
            .unwrap();
        assert_eq!(intent.id, "pi_ok");
    }

    #[tokio::test]
    async fn plain_text_body_is_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/payment-intents/pi_123/confirm"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Service Temporarily Down"))
            .mount(&server)
            .await;

        let err = client(&server)
            .confirm_payment_intent("pi_123".into(), card())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Unavailable("gateway returned a non-JSON response (200 OK)".into())
        );
    }

    #[tokio::test]
    async fn declined_card_is_rejected_without_retry() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/payment-intents/pi_123/confirm"))
            .and(body_partial_json(json!({
                "paymentMethod": { "type": "card", "card": { "expMonth": 12 } }
            })))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "message": ["Card declined", "insufficient funds"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .confirm_payment_intent("pi_123".into(), card())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected {
                status: 402,
                message: "Card declined, insufficient funds".into()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_gateway_is_unavailable() {
        let server = MockServer::start().await;
        let gateway = client(&server);
        drop(server);

        let err = gateway
            .create_payment_intent(intent_request())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    #[test]
    fn intent_statuses_map_to_payment_statuses() {
        assert_eq!(PaymentStatus::from_intent_status("succeeded"), PaymentStatus::Paid);
        assert_eq!(
            PaymentStatus::from_intent_status("requires_capture"),
            PaymentStatus::Authorized
        );
        assert_eq!(
            PaymentStatus::from_intent_status("requires_payment_method"),
            PaymentStatus::Failed
        );
        assert_eq!(PaymentStatus::from_intent_status("processing"), PaymentStatus::Pending);
    }

    #[test]
    fn card_debug_output_is_masked() {
        let debug = format!("{:?}", card().card);
        assert!(debug.contains("**** 4242"));
        assert!(!debug.contains("4242424242424242"));
        assert!(!debug.contains("123\""));
    }

    #[test]
    fn prices_convert_to_cents() {
        assert_eq!(to_minor_units(25.0), 2500);
        assert_eq!(to_minor_units(19.99), 1999);
    }
}
