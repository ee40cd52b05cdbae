pub mod diag;
pub mod model;

pub use model::{disassemble, extent, load_bin, word_at, LabelKV, Line};
