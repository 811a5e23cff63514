mod http_access;
mod json;
mod log4j;
mod plain;

pub use http_access::HttpAccessParser;
pub use json::JsonParser;
pub use log4j::{Log4jParser, MAX_CONTINUATION_LINES};
pub use plain::PlainTextParser;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::artifact::FileDescriptor;
    use crate::reader::LineRecord;

    pub fn line(number: u64, text: &str) -> LineRecord {
        LineRecord {
            file: Arc::new(FileDescriptor::new("test.log", "worker1/test.log", "worker1")),
            line_number: number,
            text: text.to_string(),
            lossy: false,
        }
    }
}
