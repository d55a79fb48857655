pub mod candle_utils;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod fill_parser;
pub mod hindsight;
pub mod lot_matcher;
pub mod models;
pub mod performance;
pub mod price_fetcher;
pub mod price_source;
pub mod report;
