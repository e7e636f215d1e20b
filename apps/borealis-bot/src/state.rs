use std::sync::Arc;

use borealis_core::{FulfillmentEngine, PanelApi};
use borealis_db::repositories::{
    OrderRepository, PromoRepository, TariffRepository, UserRepository,
};

use crate::config::AppConfig;
use crate::payments::GatewayRegistry;
use crate::services::settings_service::SettingsService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub settings: SettingsService,
    pub users: UserRepository,
    pub tariffs: TariffRepository,
    pub orders: OrderRepository,
    pub promos: PromoRepository,
    pub panel: Arc<dyn PanelApi>,
    pub engine: FulfillmentEngine,
    pub gateways: GatewayRegistry,
}
