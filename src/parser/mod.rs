pub mod encar_parser;

pub use encar_parser::{parse_accident, parse_detail, parse_search_page, SearchPage};
