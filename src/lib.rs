pub mod config;
pub mod logging;
pub mod psql;
pub mod s3;
pub mod schema;
pub mod sql;
pub mod sqlite;
pub mod sumo;
