//! facegate-store — on-disk persistence for galleries and capture artifacts.

pub mod gallery;
pub mod layout;

pub use gallery::{GalleryStore, StoreError};
pub use layout::DataLayout;
