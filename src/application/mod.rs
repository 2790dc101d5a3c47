//! Application services: the generation pipeline and the ports it drives.

pub mod audit;
pub mod background;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod publish;
pub mod quota;
pub mod render;
pub mod repos;
pub mod stage;
