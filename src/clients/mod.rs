//! Clients for the remote collaborators, one module per service. Each module
//! pairs the trait the pipelines depend on with the HTTP implementation and a
//! scripted mock for tests.

pub mod miniflux;
pub mod openai;
pub mod youtube;
