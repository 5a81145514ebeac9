//! Surge agent: scheduled watch cycles plus the health and metrics API

pub mod api;
