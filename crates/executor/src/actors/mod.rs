pub mod lease_keeper;
pub mod scan_scheduler;
pub mod supervisor;

pub use common::actors::{Actor, ActorType, ControlMessage};
