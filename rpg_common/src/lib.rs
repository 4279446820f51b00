mod idr;
mod token_amount;

pub mod helpers;
pub mod op;
mod secret;

pub use idr::{Idr, IdrConversionError, IDR_CURRENCY_CODE, IDR_CURRENCY_CODE_LOWER};
pub use secret::Secret;
pub use token_amount::TokenAmount;
