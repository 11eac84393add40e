pub mod error;
pub mod routes;

pub use routes::create_router;
