//! SeaORM entities for the monitoring tables.

pub mod alert;
pub mod health_check;
pub mod tracked_api;

pub mod prelude {
    pub use super::alert::Entity as Alert;
    pub use super::alert::Model as AlertModel;

    pub use super::health_check::Entity as HealthCheck;
    pub use super::health_check::Model as HealthCheckModel;

    pub use super::tracked_api::Entity as TrackedApi;
    pub use super::tracked_api::Model as TrackedApiModel;
}
