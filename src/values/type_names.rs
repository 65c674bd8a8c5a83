//! Type identifiers as they appear in the `value_type_name` column.

pub const BOOLEAN: &str = "boolean";
pub const INTEGER: &str = "int";
pub const LONG: &str = "long";
pub const BIG_DECIMAL: &str = "java.math.BigDecimal";
pub const DATE: &str = "java.sql.Date";
pub const TIMESTAMP: &str = "java.sql.Timestamp";
pub const LOCALE: &str = "java.util.Locale";
pub const STRING: &str = "java.lang.String";

pub const BOOLEAN_ALIASES: &[&str] = &[BOOLEAN, "java.lang.Boolean"];
pub const INTEGER_ALIASES: &[&str] = &[
    INTEGER,
    LONG,
    "short",
    "java.lang.Integer",
    "java.lang.Long",
    "java.lang.Short",
];
pub const DECIMAL_ALIASES: &[&str] = &[BIG_DECIMAL, "double", "java.lang.Double"];
pub const DATE_ALIASES: &[&str] = &[DATE, "java.time.LocalDate"];
pub const TIMESTAMP_ALIASES: &[&str] = &[TIMESTAMP, "java.util.Date", "java.time.LocalDateTime"];
pub const LOCALE_ALIASES: &[&str] = &[LOCALE];
pub const STRING_ALIASES: &[&str] = &[STRING, "string"];

/// Payloads of these types are never interpreted.
pub const BINARY: &[&str] = &["[B", "byte[]", "binary"];

/// `com.acme.erp.Order` -> `Order`, `com.acme.erp.Order$Position` -> `Position`.
pub fn simple_type_name(type_name: &str) -> &str {
    type_name
        .rsplit(|c| c == '.' || c == '$')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(type_name)
}
