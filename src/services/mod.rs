pub mod features;
pub mod layers;
pub mod pipeline;
pub mod pricing;
pub mod recommendations;
pub mod risk_model;
pub mod stats;
