pub mod refresh;
pub mod status;
