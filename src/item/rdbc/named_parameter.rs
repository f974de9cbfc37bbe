use serde::Serialize;
use serde_json::Value;
use sqlx::{Database, Sqlite, query::Query};

use crate::BatchError;

type SqliteQuery<'q> = Query<'q, Sqlite, <Sqlite as Database>::Arguments<'q>>;

/// SQL statement using `:name` placeholders.
///
/// Placeholders are rewritten to numbered SQLite parameters, one per distinct
/// name, so a name used twice is bound once. Text inside single or double
/// quotes and `::` sequences are left untouched.
///
/// # Example
///
/// ```
/// use batch_etl::item::rdbc::NamedParameterStatement;
///
/// let statement = NamedParameterStatement::parse(
///     "INSERT INTO people (first_name, last_name) VALUES (:firstName, :lastName)",
/// )
/// .unwrap();
///
/// assert_eq!(statement.sql(), "INSERT INTO people (first_name, last_name) VALUES (?1, ?2)");
/// assert_eq!(statement.names(), ["firstName", "lastName"]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NamedParameterStatement {
    sql: String,
    names: Vec<String>,
}

impl NamedParameterStatement {
    pub fn parse(sql: &str) -> Result<Self, BatchError> {
        let mut parsed = String::with_capacity(sql.len());
        let mut names: Vec<String> = Vec::new();
        let mut chars = sql.chars().peekable();
        let mut quote: Option<char> = None;

        while let Some(c) = chars.next() {
            if let Some(open) = quote {
                parsed.push(c);
                if c == open {
                    quote = None;
                }
                continue;
            }

            match c {
                '\'' | '"' => {
                    quote = Some(c);
                    parsed.push(c);
                }
                ':' if chars.peek() == Some(&':') => {
                    parsed.push_str("::");
                    chars.next();
                }
                ':' if chars
                    .peek()
                    .is_some_and(|next| next.is_ascii_alphabetic() || *next == '_') =>
                {
                    let mut name = String::new();
                    while let Some(next) = chars.peek().copied() {
                        if !(next.is_ascii_alphanumeric() || next == '_') {
                            break;
                        }
                        name.push(next);
                        chars.next();
                    }

                    let index = match names.iter().position(|n| *n == name) {
                        Some(index) => index,
                        None => {
                            names.push(name);
                            names.len() - 1
                        }
                    };
                    parsed.push_str(&format!("?{}", index + 1));
                }
                _ => parsed.push(c),
            }
        }

        if quote.is_some() {
            return Err(BatchError::Configuration(format!(
                "unterminated quote in SQL statement: {}",
                sql
            )));
        }

        Ok(Self { sql: parsed, names })
    }

    /// Statement with numbered placeholders, as sent to the database.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter names in binding order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Extracts the values bound for `item`, in binding order.
    ///
    /// The item must serialize to a map holding every parameter name.
    pub fn values<O: Serialize>(&self, item: &O) -> Result<Vec<Value>, BatchError> {
        let value = serde_json::to_value(item)
            .map_err(|e| BatchError::Persistence(format!("unable to serialize item: {}", e)))?;

        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(BatchError::Persistence(format!(
                    "item does not serialize to named fields: {}",
                    other
                )));
            }
        };

        self.names
            .iter()
            .map(|name| {
                fields.remove(name).ok_or_else(|| {
                    BatchError::Persistence(format!("item has no field for parameter :{}", name))
                })
            })
            .collect()
    }

    /// Builds the query binding the fields of `item`.
    pub(crate) fn bind<O: Serialize>(&self, item: &O) -> Result<SqliteQuery<'_>, BatchError> {
        let query = self
            .values(item)?
            .into_iter()
            .fold(sqlx::query(&self.sql), bind_value);
        Ok(query)
    }
}

fn bind_value(query: SqliteQuery<'_>, value: Value) -> SqliteQuery<'_> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => query.bind(i),
            (None, Some(f)) => query.bind(f),
            (None, None) => query.bind(n.to_string()),
        },
        Value::String(s) => query.bind(s),
        nested => query.bind(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;
    use serde_json::json;

    use super::*;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Person {
        first_name: String,
        last_name: Option<String>,
        tags: Vec<String>,
    }

    #[test]
    fn repeated_names_share_one_parameter() {
        let statement = NamedParameterStatement::parse(
            "INSERT INTO t (a, b) VALUES (:a, :b) ON CONFLICT(a) DO UPDATE SET b = :b",
        )
        .unwrap();

        assert_eq!(
            statement.sql(),
            "INSERT INTO t (a, b) VALUES (?1, ?2) ON CONFLICT(a) DO UPDATE SET b = ?2"
        );
        assert_eq!(statement.names(), ["a", "b"]);
    }

    #[test]
    fn quoted_text_and_casts_are_not_parameters() {
        let statement =
            NamedParameterStatement::parse("SELECT ':skip', \"col:x\", a::text FROM t WHERE b = :b")
                .unwrap();

        assert_eq!(
            statement.sql(),
            "SELECT ':skip', \"col:x\", a::text FROM t WHERE b = ?1"
        );
        assert_eq!(statement.names(), ["b"]);
    }

    #[test]
    fn unterminated_quote_is_a_configuration_error() {
        let result = NamedParameterStatement::parse("SELECT 'oops FROM t");
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn values_follow_binding_order() {
        let statement =
            NamedParameterStatement::parse("VALUES (:tags, :lastName, :firstName)").unwrap();
        let person = Person {
            first_name: "JILL".to_string(),
            last_name: None,
            tags: vec!["a".to_string()],
        };

        let values = statement.values(&person).unwrap();

        assert_eq!(values, vec![json!(["a"]), Value::Null, json!("JILL")]);
    }

    #[test]
    fn missing_field_is_a_persistence_error() {
        let statement = NamedParameterStatement::parse("VALUES (:firstName, :age)").unwrap();
        let person = Person {
            first_name: "JILL".to_string(),
            last_name: None,
            tags: Vec::new(),
        };

        match statement.values(&person) {
            Err(BatchError::Persistence(message)) => assert!(message.contains(":age")),
            other => panic!("expected persistence error, got {:?}", other),
        }
    }

    #[test]
    fn scalar_items_cannot_be_bound_by_name() {
        let statement = NamedParameterStatement::parse("VALUES (:value)").unwrap();
        assert!(matches!(
            statement.values(&42),
            Err(BatchError::Persistence(_))
        ));
    }
}
