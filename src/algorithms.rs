pub mod analysis;
pub mod wcc;
