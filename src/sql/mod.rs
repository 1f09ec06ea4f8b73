pub mod ident;

pub use ident::{join_idents, quote_literal, SqlIdent};
