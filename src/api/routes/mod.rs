pub mod alerts;
pub mod clients;
pub mod health;
pub mod ingest;
pub mod realtime;
pub mod registry;
pub mod stats;
