//! # Kinemol Core Library
//!
//! A molecular modelling toolkit built around three tightly coupled numerical
//! subsystems: a pluggable energy-and-gradient façade, a parallel
//! finite-difference Hessian engine with rigid-body projection, and a
//! velocity-Verlet molecular-dynamics integrator with thermostats, bond
//! constraints and boundary walls.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict three-layer architecture to ensure a
//! clear separation of concerns, making it modular, testable, and extensible.
//!
//! - **[`core`]: The Foundation.** Contains immutable physical constant
//!   tables, unit conversions, the stateless molecular data model
//!   ([`core::models::system::System`]), topology perception, XYZ and Hessian
//!   file I/O, and the [`core::potentials::Potential`] capability with its
//!   concrete back-end implementations.
//!
//! - **[`engine`]: The Logic Core.** This stateful layer orchestrates the
//!   numerical work: the [`engine::pool::WorkerPool`] concurrency substrate,
//!   the [`engine::facade::EnergyFacade`] consumed by every driver, the
//!   [`engine::hessian::HessianEngine`], and the
//!   [`engine::md::MdIntegrator`] with its thermostat, constraint and wall
//!   strategies.
//!
//! - **[`workflows`]: The Public API.** Thin, user-facing entry points that
//!   tie `engine` and `core` together into complete procedures: a dynamics
//!   run and a vibrational analysis.

pub mod core;
pub mod engine;
pub mod workflows;
