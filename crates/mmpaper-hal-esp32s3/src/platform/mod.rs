pub mod appliance;
pub mod battery;
pub mod clock;
pub mod display;
