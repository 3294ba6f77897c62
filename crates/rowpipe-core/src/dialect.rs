//! SQL dialect abstraction shared by all relational adapters.
//!
//! A dialect decides how a bare identifier is written into a SQL string for
//! one database family:
//!
//! - Identifier case folding: Oracle folds up, PostgreSQL/DuckDB fold down,
//!   SQL Server and SQLite keep identifiers as-is
//! - Quote characters: `"` (Oracle/PostgreSQL/DuckDB/SQLite), `[]` (SQL
//!   Server), `` ` `` (MySQL)
//! - Reserved keywords, matched ASCII-case-insensitively
//!
//! All operations are pure and synchronous.

/// Identifier normalization and quoting policy for one database family.
pub trait SqlDialect: Send + Sync {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    /// Reserved keywords of this dialect, uppercase.
    fn reserved_words(&self) -> &'static [&'static str];

    /// Fold an unquoted identifier to the case the backend stores it in.
    fn normalize(&self, ident: &str) -> String {
        ident.to_string()
    }

    /// Wrap an identifier in this dialect's quote characters.
    ///
    /// The default is ANSI double quotes with `""` escaping; SQL Server and
    /// MySQL override.
    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Whether the identifier must be quoted to survive a round trip:
    /// it contains characters outside `[A-Za-z_][A-Za-z0-9_]*`, it collides
    /// with a reserved keyword, or its case differs from the normalized form.
    fn needs_quoting(&self, ident: &str) -> bool {
        !is_plain_identifier(ident) || self.is_reserved(ident) || self.normalize(ident) != ident
    }

    /// ASCII-case-insensitive reserved-keyword membership.
    fn is_reserved(&self, ident: &str) -> bool {
        self.reserved_words()
            .iter()
            .any(|kw| kw.eq_ignore_ascii_case(ident))
    }

    /// Quote only when [`SqlDialect::needs_quoting`] says so.
    fn quote_if_needed(&self, ident: &str) -> String {
        if self.needs_quoting(ident) {
            self.quote(ident)
        } else {
            ident.to_string()
        }
    }
}

fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Look up a dialect by family name (`oracle`, `postgres`, `mssql`, `mysql`,
/// `sqlite`, `duckdb`).
pub fn dialect(name: &str) -> Option<&'static dyn SqlDialect> {
    match name.to_ascii_lowercase().as_str() {
        "oracle" => Some(&OracleDialect),
        "postgres" | "postgresql" => Some(&PostgreSqlDialect),
        "mssql" | "sqlserver" => Some(&SqlServerDialect),
        "mysql" | "mariadb" => Some(&MySqlDialect),
        "sqlite" => Some(&SqliteDialect),
        "duckdb" => Some(&DuckDbDialect),
        _ => None,
    }
}

pub struct OracleDialect;

impl SqlDialect for OracleDialect {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn normalize(&self, ident: &str) -> String {
        ident.to_ascii_uppercase()
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        ORACLE_RESERVED
    }
}

pub struct PostgreSqlDialect;

impl SqlDialect for PostgreSqlDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn normalize(&self, ident: &str) -> String {
        ident.to_ascii_lowercase()
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        POSTGRES_RESERVED
    }
}

/// DuckDB folds like PostgreSQL and shares most of its reserved set.
pub struct DuckDbDialect;

impl SqlDialect for DuckDbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn normalize(&self, ident: &str) -> String {
        ident.to_ascii_lowercase()
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        POSTGRES_RESERVED
    }
}

pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn quote(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        SQLSERVER_RESERVED
    }
}

pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        MYSQL_RESERVED
    }
}

pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        SQLITE_RESERVED
    }
}

const ORACLE_RESERVED: &[&str] = &[
    "ACCESS", "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "AUDIT", "BETWEEN", "BY", "CHAR",
    "CHECK", "CLUSTER", "COLUMN", "COMMENT", "COMPRESS", "CONNECT", "CREATE", "CURRENT", "DATE",
    "DECIMAL", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP", "ELSE", "EXCLUSIVE", "EXISTS",
    "FILE", "FLOAT", "FOR", "FROM", "GRANT", "GROUP", "HAVING", "IDENTIFIED", "IMMEDIATE", "IN",
    "INCREMENT", "INDEX", "INITIAL", "INSERT", "INTEGER", "INTERSECT", "INTO", "IS", "LEVEL",
    "LIKE", "LOCK", "LONG", "MINUS", "MODE", "MODIFY", "NOT", "NOWAIT", "NULL", "NUMBER", "OF",
    "OFFLINE", "ON", "ONLINE", "OPTION", "OR", "ORDER", "PRIOR", "PUBLIC", "RAW", "RENAME",
    "RESOURCE", "REVOKE", "ROW", "ROWID", "ROWNUM", "ROWS", "SELECT", "SESSION", "SET", "SHARE",
    "SIZE", "SMALLINT", "START", "SYNONYM", "SYSDATE", "TABLE", "THEN", "TO", "TRIGGER", "UID",
    "UNION", "UNIQUE", "UPDATE", "USER", "VALIDATE", "VALUES", "VARCHAR", "VARCHAR2", "VIEW",
    "WHENEVER", "WHERE", "WITH",
];

const POSTGRES_RESERVED: &[&str] = &[
    "ALL", "ANALYSE", "ANALYZE", "AND", "ANY", "ARRAY", "AS", "ASC", "ASYMMETRIC", "BOTH", "CASE",
    "CAST", "CHECK", "COLLATE", "COLUMN", "CONSTRAINT", "CREATE", "CURRENT_CATALOG",
    "CURRENT_DATE", "CURRENT_ROLE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER",
    "DEFAULT", "DEFERRABLE", "DESC", "DISTINCT", "DO", "ELSE", "END", "EXCEPT", "FALSE", "FETCH",
    "FOR", "FOREIGN", "FROM", "GRANT", "GROUP", "HAVING", "IN", "INITIALLY", "INTERSECT", "INTO",
    "LATERAL", "LEADING", "LIMIT", "LOCALTIME", "LOCALTIMESTAMP", "NOT", "NULL", "OFFSET", "ON",
    "ONLY", "OR", "ORDER", "PLACING", "PRIMARY", "REFERENCES", "RETURNING", "SELECT",
    "SESSION_USER", "SOME", "SYMMETRIC", "TABLE", "THEN", "TO", "TRAILING", "TRUE", "UNION",
    "UNIQUE", "USER", "USING", "VARIADIC", "WHEN", "WHERE", "WINDOW", "WITH",
];

const SQLSERVER_RESERVED: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "AUTHORIZATION", "BACKUP", "BEGIN",
    "BETWEEN", "BREAK", "BROWSE", "BULK", "BY", "CASCADE", "CASE", "CHECK", "CHECKPOINT", "CLOSE",
    "CLUSTERED", "COLUMN", "COMMIT", "CONSTRAINT", "CONTAINS", "CONTINUE", "CONVERT", "CREATE",
    "CROSS", "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER",
    "CURSOR", "DATABASE", "DEALLOCATE", "DECLARE", "DEFAULT", "DELETE", "DESC", "DISTINCT",
    "DOUBLE", "DROP", "ELSE", "END", "ESCAPE", "EXCEPT", "EXEC", "EXECUTE", "EXISTS", "EXIT",
    "FETCH", "FILE", "FOR", "FOREIGN", "FROM", "FULL", "FUNCTION", "GOTO", "GRANT", "GROUP",
    "HAVING", "HOLDLOCK", "IDENTITY", "IF", "IN", "INDEX", "INNER", "INSERT", "INTERSECT", "INTO",
    "IS", "JOIN", "KEY", "KILL", "LEFT", "LIKE", "MERGE", "NATIONAL", "NOT", "NULL", "OF", "OFF",
    "ON", "OPEN", "OPTION", "OR", "ORDER", "OUTER", "OVER", "PERCENT", "PIVOT", "PLAN", "PRIMARY",
    "PRINT", "PROC", "PROCEDURE", "PUBLIC", "READ", "REFERENCES", "REPLICATION", "RESTORE",
    "RETURN", "REVOKE", "RIGHT", "ROLLBACK", "ROWCOUNT", "RULE", "SAVE", "SCHEMA", "SELECT",
    "SESSION_USER", "SET", "SOME", "SYSTEM_USER", "TABLE", "THEN", "TO", "TOP", "TRAN",
    "TRANSACTION", "TRIGGER", "TRUNCATE", "UNION", "UNIQUE", "UPDATE", "USE", "USER", "VALUES",
    "VIEW", "WAITFOR", "WHEN", "WHERE", "WHILE", "WITH",
];

const MYSQL_RESERVED: &[&str] = &[
    "ADD", "ALL", "ALTER", "ANALYZE", "AND", "AS", "ASC", "BEFORE", "BETWEEN", "BIGINT", "BINARY",
    "BLOB", "BOTH", "BY", "CALL", "CASCADE", "CASE", "CHANGE", "CHAR", "CHECK", "COLLATE",
    "COLUMN", "CONDITION", "CONSTRAINT", "CONTINUE", "CONVERT", "CREATE", "CROSS", "CURSOR",
    "DATABASE", "DECIMAL", "DECLARE", "DEFAULT", "DELETE", "DESC", "DESCRIBE", "DISTINCT", "DIV",
    "DOUBLE", "DROP", "EACH", "ELSE", "ENCLOSED", "ESCAPED", "EXISTS", "EXIT", "EXPLAIN",
    "FALSE", "FETCH", "FLOAT", "FOR", "FORCE", "FOREIGN", "FROM", "FULLTEXT", "GRANT", "GROUP",
    "HAVING", "IF", "IGNORE", "IN", "INDEX", "INNER", "INSERT", "INT", "INTEGER", "INTERVAL",
    "INTO", "IS", "JOIN", "KEY", "KEYS", "KILL", "LEADING", "LEFT", "LIKE", "LIMIT", "LINES",
    "LOAD", "LOCK", "LONG", "MATCH", "MOD", "NATURAL", "NOT", "NULL", "ON", "OPTIMIZE", "OPTION",
    "OR", "ORDER", "OUT", "OUTER", "PARTITION", "PRIMARY", "PROCEDURE", "RANGE", "READ", "REAL",
    "REFERENCES", "REGEXP", "RENAME", "REPEAT", "REPLACE", "REQUIRE", "RESTRICT", "RETURN",
    "REVOKE", "RIGHT", "SCHEMA", "SELECT", "SET", "SHOW", "SMALLINT", "TABLE", "TERMINATED",
    "THEN", "TO", "TRAILING", "TRIGGER", "TRUE", "UNION", "UNIQUE", "UNLOCK", "UNSIGNED",
    "UPDATE", "USAGE", "USE", "USING", "VALUES", "VARCHAR", "WHEN", "WHERE", "WHILE", "WITH",
];

const SQLITE_RESERVED: &[&str] = &[
    "ABORT", "ADD", "ALL", "ALTER", "AND", "AS", "ASC", "ATTACH", "AUTOINCREMENT", "BEFORE",
    "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST", "CHECK", "COLLATE", "COLUMN", "COMMIT",
    "CONFLICT", "CONSTRAINT", "CREATE", "CROSS", "CURRENT_DATE", "CURRENT_TIME",
    "CURRENT_TIMESTAMP", "DEFAULT", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DROP",
    "EACH", "ELSE", "END", "ESCAPE", "EXCEPT", "EXISTS", "EXPLAIN", "FAIL", "FOR", "FOREIGN",
    "FROM", "FULL", "GLOB", "GROUP", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX",
    "INDEXED", "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN", "KEY",
    "LEFT", "LIKE", "LIMIT", "MATCH", "NATURAL", "NOT", "NOTNULL", "NULL", "OF", "OFFSET", "ON",
    "OR", "ORDER", "OUTER", "PLAN", "PRAGMA", "PRIMARY", "QUERY", "RAISE", "RECURSIVE",
    "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE", "RESTRICT", "RIGHT",
    "ROLLBACK", "ROW", "SAVEPOINT", "SELECT", "SET", "TABLE", "TEMP", "TEMPORARY", "THEN", "TO",
    "TRANSACTION", "TRIGGER", "UNION", "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW",
    "VIRTUAL", "WHEN", "WHERE", "WITH", "WITHOUT",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oracle_folds_up_and_preserves_mixed_case() {
        assert_eq!(OracleDialect.normalize("Name"), "NAME");
        assert!(OracleDialect.needs_quoting("Name"));
        assert_eq!(OracleDialect.quote("Name"), "\"Name\"");
        assert!(!OracleDialect.needs_quoting("NAME"));
    }

    #[test]
    fn postgres_reserved_words_need_quoting() {
        assert!(PostgreSqlDialect.needs_quoting("user"));
        assert!(!PostgreSqlDialect.needs_quoting("users"));
        assert!(PostgreSqlDialect.needs_quoting("USER"));
    }

    #[test]
    fn every_reserved_word_needs_quoting() {
        for d in [
            &OracleDialect as &dyn SqlDialect,
            &PostgreSqlDialect,
            &SqlServerDialect,
            &MySqlDialect,
            &SqliteDialect,
            &DuckDbDialect,
        ] {
            for kw in d.reserved_words() {
                assert!(d.needs_quoting(kw), "{} should quote {kw}", d.name());
            }
        }
    }

    #[test]
    fn non_identifier_characters_need_quoting() {
        for ident in ["first name", "1st", "a-b", "", "tab\tcol", "naïve"] {
            assert!(SqliteDialect.needs_quoting(ident), "{ident:?}");
        }
        assert!(!SqliteDialect.needs_quoting("Mixed_Case2"));
    }

    #[test]
    fn quote_characters_per_family() {
        assert_eq!(SqlServerDialect.quote("order"), "[order]");
        assert_eq!(MySqlDialect.quote("order"), "`order`");
        assert_eq!(PostgreSqlDialect.quote("or\"der"), "\"or\"\"der\"");
        assert_eq!(SqlServerDialect.quote("a]b"), "[a]]b]");
    }

    #[test]
    fn lookup_by_family_name() {
        assert_eq!(dialect("PostgreSQL").unwrap().name(), "postgres");
        assert_eq!(dialect("duckdb").unwrap().name(), "duckdb");
        assert!(dialect("cobol").is_none());
    }
}
