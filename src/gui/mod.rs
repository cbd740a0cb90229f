pub mod application;
pub mod chart;
pub mod style;
pub mod types;
