#![cfg_attr(not(test), no_std)]

//! Update-and-refresh orchestration for the MMpaper e-ink appliance.
//!
//! Everything in this crate is board-independent: the firmware binary and the
//! ESP32-S3 HAL crate plug radio, HTTP transport, storage, flash and panel
//! implementations into the traits defined here.

pub mod battery;
pub mod config;
pub mod cycle;
pub mod install;
pub mod manifest;
pub mod network;
pub mod refresh;
pub mod render;
pub mod sleep;
pub mod status;
pub mod store;
pub mod time;
pub mod transfer;
pub mod trigger;
pub mod update;

#[cfg(test)]
mod testing;
