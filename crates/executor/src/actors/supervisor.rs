use futures_util::FutureExt;
use std::{collections::HashMap, future::Future, panic::AssertUnwindSafe, time::Duration};
use tracing::{error, info, warn};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant},
};

use crate::actors::{Actor, ActorType, ControlMessage};

type ActorFactory = Box<dyn Fn() -> Box<dyn Actor> + Send + Sync>;

pub struct Supervisor {
    actor_factories: HashMap<ActorType, ActorFactory>,
    handles: HashMap<ActorType, JoinHandle<()>>,
    restarts: HashMap<ActorType, Instant>,
    restart_backoff: Duration,
}

impl Supervisor {
    pub fn new(restart_backoff: Duration) -> Self {
        Self {
            actor_factories: HashMap::new(),
            handles: HashMap::new(),
            restarts: HashMap::new(),
            restart_backoff,
        }
    }

    pub fn register_actor(&mut self, actor_type: ActorType, factory: ActorFactory) {
        self.actor_factories.insert(actor_type, factory);
    }

    /// Runs every registered actor until `shutdown` resolves. Actors that
    /// return an error or panic are rebuilt after the restart backoff.
    pub async fn start(&mut self, shutdown: impl Future<Output = ()>) {
        let mut check_interval = time::interval(Duration::from_secs(1));
        let (supervisor_tx, mut supervisor_rx) = mpsc::channel::<ControlMessage>(64);

        let actors: Vec<ActorType> = self.actor_factories.keys().copied().collect();
        actors.into_iter().for_each(|actor| {
            self.spawn_actor(actor, supervisor_tx.clone());
        });

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping {} actors", self.handles.len());
                    for (_, handle) in self.handles.drain() {
                        handle.abort();
                    }
                    break;
                }

                Some(msg) = supervisor_rx.recv() => {
                    match msg {
                        ControlMessage::Started(actor_type, id) => {
                            info!("{:?} started ({})", actor_type, id);
                        }
                        ControlMessage::Shutdown(actor_type, id) => {
                            warn!("{:?} ({}) is shutting down gracefully.", actor_type, id);
                            self.handles.remove(&actor_type);
                        }
                        ControlMessage::Error(actor_type, id, error_msg) => {
                            error!(
                                "Actor {:?} ({}) crashed: {}. Restarting in {:?}",
                                actor_type, id, error_msg, self.restart_backoff
                            );
                            self.handles.remove(&actor_type);
                            self.restarts.insert(actor_type, Instant::now() + self.restart_backoff);
                        }
                    }
                }

                _ = check_interval.tick() => {
                    let now = Instant::now();
                    let due: Vec<ActorType> = self
                        .restarts
                        .iter()
                        .filter(|(_, at)| **at <= now)
                        .map(|(actor, _)| *actor)
                        .collect();
                    for actor in due {
                        self.restarts.remove(&actor);
                        self.spawn_actor(actor, supervisor_tx.clone());
                    }
                }
            }
        }
    }

    fn spawn_actor(&mut self, actor_type: ActorType, tx: mpsc::Sender<ControlMessage>) {
        let Some(factory) = self.actor_factories.get(&actor_type) else {
            return;
        };
        let mut new_actor = factory();
        let new_actor_handle = tokio::spawn(async move {
            let id = new_actor.id();
            let report = match AssertUnwindSafe(new_actor.run(tx.clone())).catch_unwind().await {
                Ok(Ok(())) => ControlMessage::Shutdown(actor_type, id),
                Ok(Err(e)) => ControlMessage::Error(actor_type, id, format!("{:#}", e)),
                Err(_) => ControlMessage::Error(actor_type, id, "panicked".to_string()),
            };
            let _ = tx.send(report).await;
        });
        if let Some(previous) = self.handles.insert(actor_type, new_actor_handle) {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct Flaky {
        id: Uuid,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Actor for Flaky {
        fn name(&self) -> ActorType {
            ActorType::ScanScheduler
        }

        fn id(&self) -> Uuid {
            self.id
        }

        async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
            self.report_started(&supervisor_tx).await;
            if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("first run fails");
            }
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_actor_is_restarted_after_backoff() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut supervisor = Supervisor::new(Duration::from_secs(5));
        let factory_runs = runs.clone();
        supervisor.register_actor(
            ActorType::ScanScheduler,
            Box::new(move || {
                Box::new(Flaky {
                    id: Uuid::new_v4(),
                    runs: factory_runs.clone(),
                })
            }),
        );

        supervisor.start(time::sleep(Duration::from_secs(10))).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
