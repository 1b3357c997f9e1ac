use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use webscour_db::Database;

/// Spins up a PostgreSQL container, runs the workspace migrations, and
/// returns a connected pool.
///
/// The `ContainerAsync` must be kept in scope for the test duration;
/// dropping it stops the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "webscour_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let pool = connect(&container).await;

    Database::from_pool(pool.clone())
        .migrate()
        .await
        .expect("Failed to run migrations");

    (pool, container)
}

/// Connect to the container, retrying until PostgreSQL accepts connections.
///
/// The host port is looked up on every call since it can change when the
/// container is restarted.
pub async fn connect(container: &ContainerAsync<GenericImage>) -> PgPool {
    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/webscour_test");

    const MAX_RETRIES: u32 = 50;
    let mut retries = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(8)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}
