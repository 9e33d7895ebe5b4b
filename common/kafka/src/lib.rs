pub mod config;
pub mod discovery;
pub mod kafka_consumer;
pub mod kafka_producer;
pub mod stats;
