//! Hardware abstraction
//!
//! The engine reaches the display hardware only through the [`driver::Driver`] trait.
//! This module also contains the pixel format tables of [`allocator`] and the fences of
//! [`sync`] used to synchronize with the hardware.
//!
//! The [`test`] module provides an in-memory driver, useful for testing clients of the
//! engine without display hardware.

pub mod allocator;
pub mod driver;
pub mod sync;
