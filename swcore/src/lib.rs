pub mod buf;
pub mod compress;
pub mod crypto;
pub mod hash;
