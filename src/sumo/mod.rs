//! SUMO timestep logs (FCD-style XML): streaming flattening into records.

pub mod parse;

pub use parse::{for_each_record, parse_file, parse_timesteps, Record, TIME_KEY};
