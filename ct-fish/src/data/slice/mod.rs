//! 扫描切片对象的操作.

mod core;
mod save;

pub use core::{OwnedStackSlice, StackSlice};

pub use save::{ImgWriteRaw, ImgWriteVis};
