//! # Event Bus Module
//!
//! Typed publish/subscribe channel between controllers and their consumers
//! (console, UI, loggers). The event surface is a closed enum, so every
//! notification a controller can make is listed in [`AppEvent`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use halstream_core::event_bus::{event_bus, AppEvent, EventCategory, EventFilter};
//!
//! let subscription = event_bus().subscribe(
//!     EventFilter::Categories(vec![EventCategory::Error]),
//!     |event| {
//!         if let AppEvent::Error(report) = event {
//!             eprintln!("{}", report);
//!         }
//!     },
//! );
//!
//! event_bus().unsubscribe(subscription);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
