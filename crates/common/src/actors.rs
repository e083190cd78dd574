use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorType {
    LeaseKeeper,
    ScanScheduler,
    Notifier,
}

/// Messages sent from Actors to the Supervisor
pub enum ControlMessage {
    Started(ActorType, Uuid),
    Shutdown(ActorType, Uuid),
    Error(ActorType, Uuid, String),
}

impl std::fmt::Debug for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started(actor_type, id) => write!(f, "Started({:?}, {})", actor_type, id),
            Self::Shutdown(actor_type, id) => write!(f, "Shutdown({:?}, {})", actor_type, id),
            Self::Error(actor_type, id, err) => {
                write!(f, "Error({:?}, {}, {})", actor_type, id, err)
            }
        }
    }
}

/// The trait that all restartable services must implement
#[async_trait]
pub trait Actor: Send + Sync {
    /// The role this actor fills (e.g. the lease keeper)
    fn name(&self) -> ActorType;

    fn id(&self) -> Uuid;

    /// The main loop of the actor.
    /// Returning `Err` asks the supervisor to rebuild the actor after a backoff.
    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()>;

    async fn report_started(&self, supervisor_tx: &mpsc::Sender<ControlMessage>) {
        let _ = supervisor_tx
            .send(ControlMessage::Started(self.name(), self.id()))
            .await;
    }
}
