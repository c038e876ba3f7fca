pub mod adb;
pub mod bootimg;
pub mod classifier;
pub mod compress;
pub mod constants;
pub mod dtc;
pub mod erofs;
pub mod error;
pub mod exec;
pub mod layouts;
pub mod lp;
pub mod manifest;
pub mod repack;
pub mod sink;
pub mod sparse;
pub mod utils;

pub use error::{Error, ErrorKind, Result};
