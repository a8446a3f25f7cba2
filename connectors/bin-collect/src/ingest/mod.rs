// connectors/bin-collect/src/ingest/mod.rs
pub mod ws_session;
