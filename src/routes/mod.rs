pub mod analysis_route;
pub mod default_route;
