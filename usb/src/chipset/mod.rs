pub mod control;
pub mod video;
