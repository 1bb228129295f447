pub mod core;
pub mod parser;
pub mod printer;

pub use crate::core::expr::*;
pub use crate::core::import::*;
pub use crate::parser::{parse_expr, ParseError, ParseResult};
