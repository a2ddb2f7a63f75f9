// src/lib.rs
pub mod ports {
    pub mod paper;
}
pub mod advisor;
pub mod config;
pub mod connector;
pub mod extremes;
pub mod farmer;
pub mod finance;
pub mod journal;
pub mod policy;
pub mod rebalance;
pub mod registry;
