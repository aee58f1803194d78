#[macro_use]
extern crate rocket;
#[macro_use]
extern crate log;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod results;

use config::{ConfigFairing, DatabaseFairing, LedgerFairing};
use logging::LoggerFairing;

/// Construct the rocket instance: all routes mounted, config loaded,
/// database connected with its indexes in place, and a ledger client in
/// managed state.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(LedgerFairing)
        .attach(LoggerFairing)
}
