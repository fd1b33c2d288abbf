pub mod flash_store;
pub mod sd_stage;
