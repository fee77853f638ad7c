pub mod activity;
pub mod bundle;
pub mod chain;
pub mod config;
pub mod quote;
pub mod submitter;
pub mod venue;
