//! MySQL statement generation for cloning and scrubbing

/// Quote an identifier with backticks, doubling any embedded backtick
pub fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// MySQL statement builder
pub struct SqlGenerator;

impl SqlGenerator {
    pub fn create_database(db_name: &str) -> String {
        format!("CREATE DATABASE {}", quote_ident(db_name))
    }

    pub fn drop_database_if_exists(db_name: &str) -> String {
        format!("DROP DATABASE IF EXISTS {}", quote_ident(db_name))
    }

    /// Removes all rows and resets AUTO_INCREMENT
    pub fn truncate_table(table: &str) -> String {
        format!("TRUNCATE TABLE {}", quote_ident(table))
    }

    pub fn count_rows(table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", quote_ident(table))
    }

    /// Distinct values of a column, read back as text
    pub fn select_distinct_as_text(table: &str, column: &str) -> String {
        format!(
            "SELECT DISTINCT CAST({col} AS CHAR) FROM {table}",
            col = quote_ident(column),
            table = quote_ident(table)
        )
    }

    /// Parameterised update: first bind is the replacement, second the
    /// original value
    pub fn replace_value(table: &str, column: &str) -> String {
        format!(
            "UPDATE {table} SET {col} = ? WHERE {col} = ?",
            table = quote_ident(table),
            col = quote_ident(column)
        )
    }

    pub fn list_tables() -> &'static str {
        r#"
            SELECT CAST(table_name AS CHAR) AS name
            FROM information_schema.tables
            WHERE table_schema = ?
                AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#
    }

    pub fn list_databases() -> &'static str {
        r#"
            SELECT CAST(schema_name AS CHAR) AS name
            FROM information_schema.schemata
            ORDER BY schema_name
        "#
    }

    pub fn list_columns() -> &'static str {
        r#"
            SELECT CAST(column_name AS CHAR) AS name
            FROM information_schema.columns
            WHERE table_schema = ? AND table_name = ?
            ORDER BY ordinal_position
        "#
    }
}
