pub mod cli;
pub mod config;
pub mod counter;
pub mod error;
pub mod http;
pub mod infra;
pub mod logging;
pub mod server;

pub use config::ServerConfig;
pub use counter::{Clock, ManualClock, SlidingWindowCounter, SystemClock};
pub use error::{CounterError, PersistError, Result, ServerError};
pub use infra::{AdmissionLimiter, AdmissionRejected, AutosavePersistor, Persistor, StateProvider};
pub use server::CounterServer;
