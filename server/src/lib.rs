pub mod config;
pub mod context;
pub mod dispatch;
pub mod recommender;
pub mod retrieval;
pub mod routes;

use anyhow::Result;
use axum::Router;
use config::{Pipeline, PipelineConfig};

pub fn build_app(config: &PipelineConfig) -> Result<Router> {
    let pipeline = Pipeline::from_config(config)?;
    Ok(routes::router(pipeline))
}
