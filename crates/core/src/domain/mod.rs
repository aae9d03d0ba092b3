pub mod entities;
pub mod error;
pub mod repository;

pub use entities::{
    Client, Fact, Product, ProductRisk, RecommendationItem, RecommendationResult, RiskProfile,
};
pub use error::RecommendationError;
pub use repository::DataRepository;
