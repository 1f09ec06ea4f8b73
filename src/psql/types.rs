// src/psql/types.rs

use crate::schema::ScalarType;

/// Map an inferred scalar type to the PostgreSQL column type used for it.
pub fn pg_type(ty: ScalarType) -> &'static str {
    match ty {
        ScalarType::Integer => "bigint",
        ScalarType::Float => "double precision",
        ScalarType::Text => "text",
    }
}
