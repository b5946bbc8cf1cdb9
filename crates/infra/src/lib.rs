//! Infrastructure layer: event storage, command dispatch, read models,
//! projections, application services and configuration.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod services;
pub mod workers;
