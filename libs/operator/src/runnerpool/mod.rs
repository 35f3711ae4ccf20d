pub mod controller;
pub mod provider;
pub mod reconcile;
