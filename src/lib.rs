//! singbox-manager library: subscription mirroring and sing-box core updates

pub mod config;
pub mod subscription;
pub mod update;
