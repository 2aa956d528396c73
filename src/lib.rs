//! # Gearbox - Dynamic Stream Composition
//!
//! A gearbox exposes a fixed set of long-lived output streams whose values come
//! from whichever behavior ("gear") is currently active. Gears arrive over time
//! on a transmission; each new gear replaces the previous one and every output
//! switches to follow it, without consumers ever re-subscribing.
//!
//! ## Core Concepts
//!
//! - **Gear**: intent (sources to actions), model (actions to a state stream),
//!   catch (recovery from state failure) and teeth (named projections of state)
//! - **Tooth**: a named projection, either a bare view or a filter/view record
//! - **Transmission**: the stream of gears, or a function from sources to it
//! - **Sink**: one output stream per tooth, under its (optionally renamed) sink name
//!
//! The set of teeth is fixed by the default gear when the gearbox is built.
//! Teeth a later gear does not declare fall back to the default declaration;
//! teeth outside the fixed set are ignored.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use futures::{stream, StreamExt};
//! use gearbox::{Gear, Gearbox, Transmission};
//!
//! let gearbox = Gearbox::<(), (), u32, u32>::builder()
//!     .default_gear(Gear::new().view("count", |s| *s))
//!     .rename("count", "total")
//!     .build()?;
//!
//! let gear = Gear::new().model(|_| Ok(stream::iter(vec![Ok(1), Ok(2)]).boxed()));
//! let mut outputs = gearbox.engage(Transmission::from_stream(stream::iter(vec![gear])), ())?;
//! let total = outputs.take("total")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Declarations
pub mod error;
pub mod gear;
pub mod tooth;
pub mod transmission;

// Configuration and defaults
pub mod config;
pub mod defaults;

// Runtime
pub mod gearbox;
mod replay;
mod runner;
pub mod sink;
pub mod switch;

// Re-export primary types at crate root for convenience
pub use config::{GearboxBuilder, GearboxConfig, GearboxSettings, SinkMap};
pub use error::{GearError, GearStage, GearboxError, GearboxResult, ValidationError};
pub use gear::{CatchFn, Gear, IntentFn, ModelFn, StateStream, Teeth};
pub use gearbox::Gearbox;
pub use sink::{Outputs, Sink};
pub use switch::{SwitchExt, SwitchLatest};
pub use tooth::{FilterFn, Tooth, ViewFn};
pub use transmission::{GearStream, Transmission};
