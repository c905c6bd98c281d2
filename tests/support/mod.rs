#![allow(dead_code)]

mod server;

pub use server::*;
