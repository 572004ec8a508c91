/*!
 * Demo Roles
 * Cage and grate logic behind the lind-cage and lind-grate binaries
 */

pub mod cage;
pub mod catalog;
pub mod grate;

pub use cage::CageOptions;
pub use catalog::{
    chain_interceptions, demo_table, session_interceptions, DemoCatalog, EUID_GRATE_VAL,
    UID_GRATE_VAL,
};
