//! Process utilities shared by the hub binaries.

mod sig_down;

pub use sig_down::SigDown;
