pub mod cbc;
pub mod kql;
pub mod s1ql;
pub mod xql;

use huntql_translate::{Dialect, QueryCompiler};

pub use cbc::Cbc;
pub use kql::Kql;
pub use s1ql::S1ql;
pub use xql::Xql;

/// The compiler for a dialect. Compilers are stateless, so they are shared.
pub fn compiler_for(dialect: Dialect) -> &'static dyn QueryCompiler {
    match dialect {
        Dialect::Xql => &Xql,
        Dialect::S1ql => &S1ql,
        Dialect::Cbc => &Cbc,
        Dialect::Kql => &Kql,
    }
}

/// Quoted fragments that are filler words rather than command line content.
pub(crate) const CMDLINE_STOPWORDS: &[&str] = &[
    "find", "show", "list", "display", "all", "events", "event", "process", "processes", "files",
    "file", "connections", "network", "where", "that", "with", "for", "and", "the", "a", "an",
    "from", "to",
];
