pub mod repair;
pub mod transfer;
