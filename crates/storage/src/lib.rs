pub mod db;
pub mod identity;
pub mod lease;

pub use identity::InstanceIdentity;
pub use lease::{
    AcquireOutcome, AcquireRetry, LeaseConnector, LeaseError, LeaseManager, LeaseRecord,
    LeaseStatus,
};
