//! Postgres test harness backed by testcontainers.
//!
//! One container is started for the whole test run. Every harness gets its
//! own freshly migrated database in it, so scheduler sweeps in one test never
//! see another test's edits.

use anyhow::{Context, Result};
use edit_engine::config::{ConfigHandle, VotingConfig};
use edit_engine::kernel::{run_migrations, EngineDeps, MockClock, MockNotifier, PgEditStore};
use sqlx::PgPool;
use std::sync::Arc;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

use super::{scenario_config, start_time};

struct SharedPostgres {
    admin_url: String,
    base_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_POSTGRES: OnceCell<SharedPostgres> = OnceCell::const_new();

impl SharedPostgres {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let base_url = format!("postgresql://postgres:postgres@{}:{}", host, port);

        Ok(Self {
            admin_url: format!("{}/postgres", base_url),
            base_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_POSTGRES
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared Postgres container")
            })
            .await
    }
}

/// Engine wired to a real Postgres store.
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(PgHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &mut PgHarness) {
///     let mut tx = ctx.store.begin().await.unwrap();
///     // ... test code
/// }
/// ```
pub struct PgHarness {
    pub pool: PgPool,
    pub store: PgEditStore,
    pub notifier: MockNotifier,
    pub clock: MockClock,
    pub config: ConfigHandle,
    pub deps: EngineDeps,
}

impl AsyncTestContext for PgHarness {
    async fn setup() -> Self {
        Self::new(scenario_config())
            .await
            .expect("Failed to create Postgres harness")
    }

    async fn teardown(self) {
        self.pool.close().await;
    }
}

impl PgHarness {
    pub async fn new(config: VotingConfig) -> Result<Self> {
        let shared = SharedPostgres::get().await;

        let database = format!("edit_engine_{}", uuid::Uuid::now_v7().simple());
        let admin = PgPool::connect(&shared.admin_url)
            .await
            .context("Failed to connect to admin database")?;
        sqlx::query(&format!("CREATE DATABASE \"{}\"", database))
            .execute(&admin)
            .await
            .context("Failed to create test database")?;
        admin.close().await;

        let pool = PgPool::connect(&format!("{}/{}", shared.base_url, database))
            .await
            .context("Failed to connect to test database")?;
        run_migrations(&pool).await?;

        let config = ConfigHandle::new(config);
        let store = PgEditStore::new(pool.clone(), config.clone());
        let notifier = MockNotifier::new();
        let clock = MockClock::new(start_time());
        let deps = EngineDeps::new(
            Arc::new(store.clone()),
            Arc::new(notifier.clone()),
            Arc::new(clock.clone()),
            config.clone(),
        );

        Ok(Self {
            pool,
            store,
            notifier,
            clock,
            config,
            deps,
        })
    }
}
