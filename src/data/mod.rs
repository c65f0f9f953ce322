//! Image data and the multi-TE ASL dataset built on it.

pub mod asldata;
pub mod image;

pub use asldata::{AslImage, LabelFormat};
pub use image::Image;
