use anyhow::Context;
use dotenvy::dotenv;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use common::actors::ActorType;
use common::logger;
use common::models::Signal;
use common::pool::BlockingPool;
use common::settings::{JsonSettingsStore, SettingsStore, StaticSettings};
use market_data::SessionCalendar;
use market_data::remote::YahooFeed;
use storage::{AcquireRetry, InstanceIdentity, LeaseConnector};
use strategy::remote::GroqScorer;
use strategy::{
    AiScorer, IndicatorScorer, NeutralAiScorer, PairScanner, ScannerConfig, SignalDesk,
    SignalRegistry,
};

use crate::actors::lease_keeper::LeaseKeeper;
use crate::actors::scan_scheduler::{ScanScheduler, SchedulerTiming};
use crate::actors::supervisor::Supervisor;
use crate::config::BotConfig;
use crate::services::telegram_service::TelegramService;
use crate::state::{Role, ScanStats};

mod actors;
mod config;
mod services;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    logger::setup_logger();
    debug!("System starting up...");

    let config = BotConfig::from_env().context("reading configuration")?;

    let identity = InstanceIdentity::current(&config.instance_secret);
    let lease = Arc::new(LeaseConnector::new(&config.lease_db_path, identity));
    let initial_role = startup_role(&lease, &config).await;

    let settings: Arc<dyn SettingsStore> = match JsonSettingsStore::open(&config.settings_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(
                "Settings at {} unusable ({}), using defaults",
                config.settings_path.display(),
                e
            );
            Arc::new(StaticSettings::default())
        }
    };

    let ai: Arc<dyn AiScorer> = match &config.groq_api_key {
        Some(key) => Arc::new(GroqScorer::new(key.clone()).context("building AI client")?),
        None => {
            warn!("GROQ_API_KEY not set, AI scoring disabled");
            Arc::new(NeutralAiScorer)
        }
    };

    let scanner = PairScanner::new(
        Arc::new(YahooFeed::new().context("building market data client")?),
        Arc::new(IndicatorScorer),
        ai,
        BlockingPool::new(config.worker_pool_size),
        ScannerConfig::default(),
    );
    let desk = Arc::new(SignalDesk::new(
        Arc::new(SessionCalendar::default_table()),
        scanner,
        Arc::new(SignalRegistry::new()),
        settings,
        config.auto_threshold,
    ));

    let (role_tx, role_rx) = watch::channel(initial_role);
    let role_tx = Arc::new(role_tx);
    let (signal_tx, _) = broadcast::channel::<Signal>(16);
    let stats = Arc::new(Mutex::new(ScanStats::default()));

    let mut supervisor = Supervisor::new(config.loop_error_backoff);

    let lease_for_keeper = lease.clone();
    let keeper_config = config.clone();
    supervisor.register_actor(
        ActorType::LeaseKeeper,
        Box::new(move || {
            Box::new(LeaseKeeper::new(
                lease_for_keeper.clone(),
                role_tx.clone(),
                keeper_config.lease_duration,
                keeper_config.lease_renew,
                keeper_config.standby_retry,
            ))
        }),
    );

    let timing = SchedulerTiming {
        tick: config.scheduler_tick,
        scan_interval: config.scan_interval,
        sweep_expired: config.sweep_expired_signals,
    };
    let desk_for_scheduler = desk.clone();
    let signals_for_scheduler = signal_tx.clone();
    supervisor.register_actor(
        ActorType::ScanScheduler,
        Box::new(move || {
            Box::new(ScanScheduler::new(
                desk_for_scheduler.clone(),
                role_rx.clone(),
                stats.clone(),
                signals_for_scheduler.clone(),
                timing.clone(),
            ))
        }),
    );

    match config.telegram.clone() {
        Some(telegram) => {
            let signals_for_notifier = signal_tx.clone();
            supervisor.register_actor(
                ActorType::Notifier,
                Box::new(move || {
                    Box::new(TelegramService::new(&telegram, signals_for_notifier.subscribe()))
                }),
            );
        }
        None => warn!("Telegram not configured, signals are only logged"),
    }

    supervisor
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    match lease.connected() {
        Some(manager) => match manager.release().await {
            Ok(true) => info!("Lease released"),
            Ok(false) => debug!("No lease to release"),
            Err(e) => error!("Failed to release lease: {}", e),
        },
        None => debug!("Lease store never opened, nothing to release"),
    }
    Ok(())
}

/// Primary only if the lease is won at startup. An unreachable store leaves
/// the process secondary; the lease keeper keeps retrying it.
async fn startup_role(lease: &LeaseConnector, config: &BotConfig) -> Role {
    let leader = match lease.manager().await {
        Ok(manager) => {
            manager
                .acquire_with_retry(config.lease_duration, &AcquireRetry::default())
                .await
        }
        Err(e) => {
            error!(
                "Lease store at {} unavailable: {}",
                config.lease_db_path.display(),
                e
            );
            false
        }
    };

    if leader {
        info!("Running as primary: instance={}", lease.identity());
        Role::PrimaryScheduling
    } else {
        warn!("Could not acquire lease, running as secondary: instance={}", lease.identity());
        Role::Secondary
    }
}
