//! hetsched -- FFT / Viterbi task scheduling across CPU and accelerators.
//!
//! This crate provides a fixed-capacity task metadata pool, per-kind banks
//! of accelerator units with their DMA buffers and descriptors, and a
//! scheduler that places each task on the CPU or a unit, marshals the
//! payload, and returns the block to the pool.

pub mod accel;
pub mod config;
pub mod cpu;
pub mod fatal;
pub mod pool;
pub mod scheduler;
pub mod task;
pub mod workload;
