use std::sync::Arc;

use crate::{
    api::{auth::AuthClient, payment_gateway::PaymentGateway},
    booking::slot_sync::SlotSync,
    core::{config::Config, db::DbPool},
};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub config: Arc<Config>,
    pub auth: AuthClient,
    pub payment_gateway: Arc<dyn PaymentGateway>,
    pub slot_sync: SlotSync,
}
