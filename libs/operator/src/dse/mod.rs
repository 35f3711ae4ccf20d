pub mod controller;
pub mod env;
pub mod reconcile;
pub mod resources;
