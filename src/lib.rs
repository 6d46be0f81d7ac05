pub mod cli;
pub mod config;
pub mod db;
pub mod embed;
pub mod error;
pub mod feature;
pub mod filter;
pub mod imdb;
pub mod import;
mod metrics;
pub mod scanner;
pub mod server;
pub mod utils;

pub use config::{Config, Opts};
pub use filter::{Extension, Filter};
pub use imdb::{IMDB, IMDBBuilder, SearchResult};
pub use import::{ImportOutcome, ImportReport, SkipReason, StoreErrorPolicy};
