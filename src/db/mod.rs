pub mod models;
pub mod read_model;
pub mod schema;

use diesel_async::pooled_connection::deadpool::{BuildError, Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

use crate::api::error::ApiError;
use crate::config::DatabaseConfig;

pub type DbPool = deadpool::managed::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;
pub type DbConn = Object<AsyncPgConnection>;

/// Builds the process-wide pool. Connections are opened lazily on first use.
pub fn create_pool(config: &DatabaseConfig) -> Result<DbPool, BuildError> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.url);
    Pool::builder(manager)
        .max_size(config.max_connections)
        .build()
}

pub async fn connection(pool: &DbPool) -> Result<DbConn, ApiError> {
    Ok(pool.get().await?)
}
