#![forbid(unsafe_code)]

pub mod adapters;
pub mod auth;
pub mod collaborators;
pub mod dispatcher;
pub mod gateway;
pub mod guard;
pub mod registry;
pub mod routes;
pub mod state;
