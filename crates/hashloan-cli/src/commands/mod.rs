pub mod address;
pub mod init;
pub mod keygen;
pub mod preimage;
pub mod timelocks;
