//! Payment verification service
//!
//! Confirms a payment after the provider redirects the buyer back to the
//! events site: polls the backend verify endpoint on a fixed interval with
//! a bounded attempt budget, exposes the session state to the landing page,
//! and offers manual re-check and reconciliation actions.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
