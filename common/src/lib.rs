pub mod cancel;
pub mod error;
pub mod log;
pub mod value;

pub use error::{Result, TableWireError};
