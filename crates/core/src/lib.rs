pub mod application;
pub mod domain;
pub mod error;
pub mod features;
pub mod ports;
pub mod retry;
pub mod text;
pub mod utils;
