//! Request manager integration test harness

#[allow(dead_code)]
mod common;
mod manager;
