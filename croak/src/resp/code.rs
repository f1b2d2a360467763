pub use toad_msg::Code;

use crate::code;

// 2.xx
code!(rfc7252("5.9.1.1") CREATED = 2 * 01);
code!(rfc7252("5.9.1.2") DELETED = 2 * 02);
code!(rfc7252("5.9.1.3") VALID   = 2 * 03);
code!(rfc7252("5.9.1.4") CHANGED = 2 * 04);
code!(rfc7252("5.9.1.5") CONTENT = 2 * 05);

// 4.xx
code!(rfc7252("5.9.2.1") BAD_REQUEST         = 4 * 00);
code!(rfc7252("5.9.2.5") NOT_FOUND           = 4 * 04);
code!(rfc7252("5.9.2.6") METHOD_NOT_ALLOWED  = 4 * 05);
code!(rfc7252("5.9.2.7") NOT_ACCEPTABLE      = 4 * 06);
code!(rfc7252("5.9.2.9") PRECONDITION_FAILED = 4 * 12);

// 5.xx
code!(rfc7252("5.9.3.1") INTERNAL_SERVER_ERROR = 5 * 00);

const PHRASES: [(Code, &str); 11] = [(CREATED, "Created"),
                                     (DELETED, "Deleted"),
                                     (VALID, "Valid"),
                                     (CHANGED, "Changed"),
                                     (CONTENT, "Content"),
                                     (BAD_REQUEST, "Bad Request"),
                                     (NOT_FOUND, "Not Found"),
                                     (METHOD_NOT_ALLOWED, "Method Not Allowed"),
                                     (NOT_ACCEPTABLE, "Not Acceptable"),
                                     (PRECONDITION_FAILED, "Precondition Failed"),
                                     (INTERNAL_SERVER_ERROR, "Internal Server Error")];

/// Get the standard reason phrase for a response code
/// this endpoint knows how to produce.
///
/// ```
/// use croak::resp::code;
///
/// assert_eq!(code::phrase(code::NOT_ACCEPTABLE), Some("Not Acceptable"));
/// assert_eq!(code::phrase(toad_msg::Code::new(2, 31)), None);
/// ```
pub fn phrase(code: Code) -> Option<&'static str> {
  PHRASES.iter()
         .find(|(c, _)| c.class == code.class && c.detail == code.detail)
         .map(|(_, p)| *p)
}

/// Render a code in dotted notation, e.g. `2.05`
pub fn dotted(code: Code) -> String {
  format!("{}.{:02}", code.class, code.detail)
}
