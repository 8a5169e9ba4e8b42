pub mod types;

pub use types::{
    parse, serialize, AttributePath, BuildInputEdge, BuildInputType, License, NixpkgsMetadata,
    Output, ParseError, ParsedName, Record, Source,
};
