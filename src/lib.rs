//! Album artwork resolution for music players.
//!
//! Artwork is looked up in a cache, then in a fixed list of local file
//! locations, then (when enabled) through remote cover providers. A single
//! background worker does the lookups; the consumer thread drains its
//! results through a [`result_pump::ResultPump`] and only applies those
//! still relevant to what is on screen.

pub mod art_cache;
pub mod art_locator;
pub mod art_worker;
pub mod artwork_manager;
pub mod config;
pub mod image_pipeline;
pub mod protocol;
pub mod remote_art;
pub mod result_pump;
