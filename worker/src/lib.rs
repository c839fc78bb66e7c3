pub mod builder;
pub mod config;
pub mod container;
pub mod error;
pub mod probe;
pub mod shell;
pub mod train;
pub mod watch;
pub mod worker;
pub mod workload;

pub use builder::WorkerBuilder;
pub use config::NodeConfig;
pub use error::{Result, WorkerErr};
pub use worker::Worker;
