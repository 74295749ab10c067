#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

pub mod dt;
pub mod error;
pub mod proxy;
pub mod sql;
