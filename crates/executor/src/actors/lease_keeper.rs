use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use storage::{LeaseConnector, LeaseManager};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actors::{Actor, ActorType, ControlMessage};
use crate::state::Role;

/// Keeps the lease alive while primary and keeps trying for it while secondary.
/// The current role is published on a watch channel.
pub struct LeaseKeeper {
    id: Uuid,
    lease: Arc<LeaseConnector>,
    role: Arc<watch::Sender<Role>>,
    lease_duration: Duration,
    renew_every: Duration,
    standby_retry: Duration,
}

impl LeaseKeeper {
    pub fn new(
        lease: Arc<LeaseConnector>,
        role: Arc<watch::Sender<Role>>,
        lease_duration: Duration,
        renew_every: Duration,
        standby_retry: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lease,
            role,
            lease_duration,
            renew_every,
            standby_retry,
        }
    }

    /// One keeper round. Returns the role it leaves behind.
    pub async fn step(&self) -> Role {
        let current = *self.role.borrow();
        let next = match self.lease.manager().await {
            Ok(manager) => match current {
                Role::PrimaryScheduling => {
                    if manager.is_leader().await {
                        self.renew(manager).await
                    } else {
                        warn!("Lease lost, attempting one reacquire");
                        self.reacquire(manager).await
                    }
                }
                Role::Secondary => self.reacquire(manager).await,
            },
            Err(e) => {
                error!("Lease store unavailable: {}", e);
                Role::Secondary
            }
        };

        if next != current {
            match next {
                Role::PrimaryScheduling => info!("Promoted to primary: instance={}", self.lease.identity()),
                Role::Secondary => warn!("Demoted to secondary: instance={}", self.lease.identity()),
            }
        }
        // Only real transitions wake the scheduler.
        self.role.send_if_modified(|role| {
            let changed = *role != next;
            *role = next;
            changed
        });
        next
    }

    async fn renew(&self, manager: &LeaseManager) -> Role {
        match manager.renew(self.lease_duration).await {
            Ok(true) => Role::PrimaryScheduling,
            Ok(false) => {
                warn!("Lease renewal refused, no longer the holder");
                Role::Secondary
            }
            Err(e) => {
                // The next round's leadership check settles it.
                error!("Lease renewal failed: {}", e);
                Role::PrimaryScheduling
            }
        }
    }

    async fn reacquire(&self, manager: &LeaseManager) -> Role {
        match manager.try_acquire(self.lease_duration).await {
            Ok(outcome) if outcome.is_acquired() => Role::PrimaryScheduling,
            Ok(outcome) => {
                debug!("Standing by: {:?}", outcome);
                Role::Secondary
            }
            Err(e) => {
                error!("Lease acquisition failed: {}", e);
                Role::Secondary
            }
        }
    }
}

#[async_trait]
impl Actor for LeaseKeeper {
    fn name(&self) -> ActorType {
        ActorType::LeaseKeeper
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        self.report_started(&supervisor_tx).await;
        loop {
            let pause = if *self.role.borrow() == Role::PrimaryScheduling {
                self.renew_every
            } else {
                self.standby_retry
            };
            sleep(pause).await;
            self.step().await;
        }
    }
}
