//! Service layer: the dispatcher pipeline, the object-store seam and
//! its dev implementation, the temporary-upload registry, and the
//! reaper.

pub mod dispatcher;
pub mod local_store;
pub mod object_store;
pub mod reaper;
pub mod registry;
pub mod signing;
