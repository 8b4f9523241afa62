pub mod catalog;
pub mod config;
pub mod exchange;
pub mod matcher;
pub mod model;
pub mod normalizer;
pub mod notifier;
pub mod parser;
pub mod pipeline;
pub mod resolver;
pub mod scraper;
pub mod session;
pub mod storage;
pub mod translate;
pub mod utils;
