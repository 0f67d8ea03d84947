pub mod db;
pub mod error;
pub mod export;
pub mod import;
pub mod models;
pub mod service;
