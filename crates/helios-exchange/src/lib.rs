/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public exchange-interface crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod adapter;
pub mod error;
pub mod types;

pub use adapter::ExchangeAdapter;
pub use error::{HeliosError, Result};
pub use types::*;
