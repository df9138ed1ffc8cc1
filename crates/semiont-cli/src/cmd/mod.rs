pub mod init;
pub mod lifecycle;
pub mod secret;
pub mod state;
