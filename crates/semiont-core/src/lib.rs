pub mod config;
pub mod envfile;
pub mod error;
pub mod io;
pub mod paths;
pub mod requirements;
pub mod results;
pub mod state;
pub mod types;

pub use error::{Result, SemiontError};
