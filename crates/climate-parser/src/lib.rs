pub mod errors;
pub mod table;
pub mod values;

pub use errors::ParserError;
pub use table::{DelimitedTable, HeaderIndex, Row};
pub use values::{
    parse_optional_date, parse_optional_f64, parse_optional_i32, parse_optional_i64,
    parse_optional_text,
};

#[cfg(test)]
mod tests;
