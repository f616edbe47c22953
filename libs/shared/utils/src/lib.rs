pub mod dates;
pub mod phone;
pub mod test_utils;

pub use dates::*;
pub use phone::*;
