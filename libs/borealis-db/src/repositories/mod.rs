pub mod order_repo;
pub mod promo_repo;
pub mod settings_repo;
pub mod tariff_repo;
pub mod user_repo;

pub use order_repo::OrderRepository;
pub use promo_repo::PromoRepository;
pub use settings_repo::SettingsRepository;
pub use tariff_repo::TariffRepository;
pub use user_repo::UserRepository;
