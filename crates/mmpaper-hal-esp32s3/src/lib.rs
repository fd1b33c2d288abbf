#![no_std]

//! ESP32-S3 board support for MMpaper: flash-backed schedule store, SD card
//! staging, Wi-Fi plus HTTP transport, OTA slot writer, the memory-in-pixel
//! panel and the ROM JPEG decoder.

pub mod network;
pub mod ota;
pub mod platform;
pub mod render;
pub mod storage;
