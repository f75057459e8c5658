use rusqlite::types::ToSql;

/// Accumulates `AND`-joined WHERE clauses with their positional arguments.
#[derive(Default)]
pub(crate) struct Filter {
    clauses: Vec<&'static str>,
    args: Vec<Box<dyn ToSql>>,
}

impl Filter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add `clause` (containing exactly one `?`) when `value` is present.
    pub(crate) fn eq<T: ToSql + 'static>(&mut self, clause: &'static str, value: Option<T>) {
        if let Some(v) = value {
            self.clauses.push(clause);
            self.args.push(Box::new(v));
        }
    }

    /// The WHERE body; `1 = 1` when no clause was added.
    pub(crate) fn sql(&self) -> String {
        if self.clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    pub(crate) fn params(&self) -> impl rusqlite::Params + '_ {
        rusqlite::params_from_iter(self.args.iter())
    }
}
