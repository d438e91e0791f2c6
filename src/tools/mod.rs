pub mod configure;
pub mod extract;
pub mod generate;
