//! The parsed statement model consumed by the proxy. Statements arrive already
//! parsed from the wire layer; this module only holds the tree and helpers to
//! render it back to SQL for logging.

pub mod ast;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RE_IDENT: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap();
}

/// Formats an identifier, quoting it with backticks if needed.
pub fn format_ident(ident: &str) -> String {
    if RE_IDENT.is_match(ident) {
        ident.to_string()
    } else {
        format!("`{}`", ident.replace('`', "``"))
    }
}

#[test]
fn test_format_ident() {
    assert_eq!(format_ident("account_tbl"), "account_tbl");
    assert_eq!(format_ident("order table"), "`order table`");
    assert_eq!(format_ident("a`b"), "`a``b`");
}
