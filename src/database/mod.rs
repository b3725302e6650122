pub mod connection;
pub mod migrations;
pub mod provisioning;
pub mod registry;
