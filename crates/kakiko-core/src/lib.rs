#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

pub mod converter;
pub mod handler;
pub mod naming;
pub mod pack;
pub mod storage;
