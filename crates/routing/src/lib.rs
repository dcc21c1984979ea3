mod macros;

pub use http::{Extensions, HeaderMap, StatusCode, Uri, Version};

pub mod application;
pub mod context;
pub mod controllers;
pub mod cookies;
pub mod errors;
pub mod filters;
pub mod invoker;
pub mod requests;
pub mod response;
pub mod results;
pub mod routes;
pub mod security;
pub mod session;
