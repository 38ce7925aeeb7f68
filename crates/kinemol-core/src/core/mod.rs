pub mod constants;
pub mod io;
pub mod models;
pub mod potentials;
pub mod units;
