pub mod engine;
pub mod policy;

pub use engine::RecommendationEngine;
pub use policy::ScoringPolicy;
