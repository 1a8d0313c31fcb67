use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::{
    Selectable,
    prelude::{AsChangeset, Identifiable, Insertable, Queryable},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

// Users

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserEntity {
    pub id: Uuid,
    pub role: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub residence: Option<String>,
    pub house_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UpsertUserEntity {
    pub id: Uuid,
    pub role: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub residence: Option<String>,
    pub house_number: Option<String>,
}

// Listings

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::listings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ListingEntity {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub base_price: f64,
    pub currency: String,
    pub duration_minutes: i32,
    pub slot_size_minutes: i32,
    pub is_active: bool,
    pub service_variants: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::listings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateListingEntity {
    pub provider_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub base_price: f64,
    pub currency: String,
    pub duration_minutes: i32,
    pub slot_size_minutes: i32,
    pub service_variants: Value,
}

/// Partial listing update; `None` fields are left untouched.
#[derive(AsChangeset, Deserialize, Debug, Default, ToSchema)]
#[diesel(table_name = crate::schema::listings)]
pub struct UpdateListingEntity {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub base_price: Option<f64>,
    pub duration_minutes: Option<i32>,
    pub slot_size_minutes: Option<i32>,
    pub is_active: Option<bool>,
    pub service_variants: Option<Value>,
}

/// One priced variant of a listing (e.g. "large dog" for a grooming service).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ServiceVariant {
    pub name: String,
    pub price: f64,
    pub duration_minutes: Option<i32>,
}

// Weekly availability

#[derive(Queryable, Selectable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::provider_availability)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AvailabilityEntity {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::provider_availability)]
pub struct CreateAvailabilityEntity {
    pub provider_id: Uuid,
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

// Appointments

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AppointmentEntity {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub client_id: Uuid,
    pub listing_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: String,
    pub service_variant: Option<String>,
    /// Price of this occurrence, fixed at booking time.
    pub price: f64,
    pub recurring_rule_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateAppointmentEntity {
    pub provider_id: Uuid,
    pub client_id: Uuid,
    pub listing_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: String,
    pub service_variant: Option<String>,
    pub price: f64,
    pub recurring_rule_id: Option<Uuid>,
    pub notes: Option<String>,
}

// Recurring rules

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::recurring_rules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RecurringRuleEntity {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub client_id: Uuid,
    pub listing_id: Uuid,
    pub frequency: String,
    pub day_of_week: i32,
    pub week_of_month: Option<i32>,
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::recurring_rules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateRecurringRuleEntity {
    pub provider_id: Uuid,
    pub client_id: Uuid,
    pub listing_id: Uuid,
    pub frequency: String,
    pub day_of_week: i32,
    pub week_of_month: Option<i32>,
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

// Time slots

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, PartialEq, ToSchema)]
#[diesel(table_name = crate::schema::provider_time_slots)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TimeSlotEntity {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub listing_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: bool,
    pub is_reserved: bool,
    pub slot_type: String,
    pub recurring_rule_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::provider_time_slots)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateTimeSlotEntity {
    pub provider_id: Uuid,
    pub listing_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: bool,
    pub is_reserved: bool,
    pub slot_type: String,
    pub recurring_rule_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
}

// Payments

#[derive(Queryable, Serialize, Selectable, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentEntity {
    pub id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub client_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Serialize, Deserialize, Debug)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreatePaymentEntity {
    pub appointment_id: Option<Uuid>,
    pub client_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub provider: String,
    pub status: String,
}

// Ratings

#[derive(Queryable, Selectable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::provider_ratings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RatingEntity {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub provider_id: Uuid,
    pub client_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::provider_ratings)]
pub struct CreateRatingEntity {
    pub appointment_id: Uuid,
    pub provider_id: Uuid,
    pub client_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
}
