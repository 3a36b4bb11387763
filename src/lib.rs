pub mod coder;
pub mod coordinator;
pub mod direction;
pub mod error;
pub mod halo;
pub mod image;
pub mod message;
pub mod sampler;
pub mod sub_image;
pub mod topology;
pub mod worker;
