pub mod assign;
pub mod init;
pub mod session;
pub mod simulate;
pub mod slots;
pub mod status;
