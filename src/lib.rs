#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # Scanout: a display composition engine
//!
//! This crate decides, frame by frame, which client layers of a display are scanned out
//! directly by hardware planes and which are composed in software, and drives the
//! displays through hotplug, power and mode changes.
//!
//! ## Structure of the crate
//!
//! - [`device`] is the entry point. A [`Device`](device::Device) owns all displays of one
//!   piece of display hardware and exposes them through the [`Composer`](device::Composer)
//!   trait.
//! - [`display`] contains the per-display state machine and the frame cycle
//!   (validate, accept, present), as well as writeback for virtual displays.
//! - [`compositor`] contains the per-frame decisions: plane assignment, HDR mode and
//!   static-screen handling, plus the commit queue producing release and retire fences.
//! - [`layer`] and [`plane`] describe what gets composed and what it gets composed onto.
//! - [`backend`] contains the [`Driver`](backend::driver::Driver) trait through which all
//!   hardware access happens, and the fences used to synchronize with the hardware.
//!
//! ## The frame cycle
//!
//! Clients modify layers, call `validate` to learn which layers the engine will
//! compose in software, draw those into the frame-buffer-target, call `accept_changes`
//! and finally `present`. Release fences follow the frame-N-returns-frame-N-1
//! convention: the fence returned for a layer signals once the hardware stopped reading
//! the buffer the layer showed in the previous frame.
//!
//! ## The event loop
//!
//! Hotplug, vertical blanks and timers are detected on background threads and delivered
//! through a [`calloop`] event source, see [`device`]. All state changes happen on the
//! thread dispatching the event loop.
//!
//! ### Logging
//!
//! Scanout makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod backend;
pub mod compositor;
pub mod config;
pub mod device;
pub mod display;
pub mod error;
pub mod layer;
pub mod plane;
pub mod utils;

pub mod reexports;
