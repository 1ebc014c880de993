pub mod local;
pub mod oss;
