pub mod article;
pub mod holding;

pub use article::*;
pub use holding::*;
