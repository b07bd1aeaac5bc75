use std::fmt::Write;

use tiberius::ToSql;

/// QueryBuilder
///
/// Assembles a statement from fixed SQL fragments and bound values. Values are
/// only ever emitted as `@Pn` placeholders, never spliced into the text.
pub(crate) struct QueryBuilder {
    sql: String,
    params: Vec<Box<dyn ToSql>>,
}

impl QueryBuilder {
    pub(crate) fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    pub(crate) fn push_bind<T: ToSql + 'static>(&mut self, value: T) -> &mut Self {
        self.params.push(Box::new(value));
        // Writing to a String cannot fail.
        let _ = write!(self.sql, "@P{}", self.params.len());
        self
    }

    /// Appends `column LIKE @Pn ESCAPE '\'` matching `value` anywhere in the
    /// column, with `%`, `_` and `[` in `value` taken literally.
    pub(crate) fn push_contains(&mut self, column: &str, value: &str) -> &mut Self {
        self.push(column)
            .push(" LIKE ")
            .push_bind(contains_pattern(value))
            .push(" ESCAPE '\\'")
    }

    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    pub(crate) fn params(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

/// `%value%` for `LIKE ... ESCAPE '\'`, with the pattern metacharacters of
/// `value` escaped.
fn contains_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_' | '[') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_numbered_in_bind_order() {
        let mut query = QueryBuilder::new("SELECT * FROM CW2.Trail WHERE 1 = 1");
        query.push(" AND Difficulty = ").push_bind("Hard".to_string());
        query.push(" AND Length >= ").push_bind(2.5_f64);
        query.push(" ORDER BY TrailID OFFSET ").push_bind(0_i64).push(" ROWS");

        assert_eq!(
            query.sql(),
            "SELECT * FROM CW2.Trail WHERE 1 = 1 AND Difficulty = @P1 AND Length >= @P2 ORDER BY TrailID OFFSET @P3 ROWS"
        );
        assert_eq!(query.params().len(), 3);
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(contains_pattern("Tor"), "%Tor%");
        assert_eq!(contains_pattern("100%"), "%100\\%%");
        assert_eq!(contains_pattern("a_b"), "%a\\_b%");
        assert_eq!(contains_pattern("[x]"), "%\\[x]%");
        assert_eq!(contains_pattern("C:\\maps"), "%C:\\\\maps%");
    }

    #[test]
    fn contains_clause_declares_the_escape_character() {
        let mut query = QueryBuilder::new("SELECT CityID FROM CW2.City WHERE ");
        query.push_contains("CityName", "St_Ives");
        assert_eq!(
            query.sql(),
            "SELECT CityID FROM CW2.City WHERE CityName LIKE @P1 ESCAPE '\\'"
        );
        assert_eq!(query.params().len(), 1);
    }

    #[test]
    fn bound_text_never_reaches_the_statement() {
        let mut query = QueryBuilder::new("SELECT 1 WHERE Name LIKE ");
        query.push_bind(contains_pattern("'; DROP TABLE CW2.Trail; --"));
        assert!(!query.sql().contains("DROP"));
    }
}
