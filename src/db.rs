pub mod error;
pub mod models;
pub mod outlet_repository;
pub mod pool;
pub mod weather_repository;

pub use error::DbError;
pub use models::*;
pub use outlet_repository::OutletRepository;
pub use pool::DbPool;
pub use weather_repository::WeatherRepository;
