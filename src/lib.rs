pub mod cache;
pub mod config;
pub mod dashboard;
pub mod models;
pub mod scm;
pub mod web;
