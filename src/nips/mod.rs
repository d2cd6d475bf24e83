//! Optional protocol extensions, attachable at relay construction.

pub mod nip09;
pub mod nip16;
pub mod nip33;
