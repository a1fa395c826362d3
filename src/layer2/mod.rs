// Layer 2 - Feed parsing and book state

pub mod book_mirror;
pub mod parser;

pub use book_mirror::{BookMirror, BookTop};
pub use parser::{MessageParser, ParseError, ParsedDepthUpdate, ParsedMessage, ParsedTrade, ParserStats, PriceLevel};
