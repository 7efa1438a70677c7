//! Orangeslices library exports

pub mod bar;
pub mod core;
pub mod ipc;
pub mod slices;

#[cfg(test)]
pub mod test_support;
