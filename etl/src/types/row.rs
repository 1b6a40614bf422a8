use crate::types::Value;

/// A flat, ordered set of column values destined for one warehouse row.
///
/// Columns keep the order of the mapping they were extracted with so generated statements are
/// stable across records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertRow {
    columns: Vec<(String, Value)>,
}

impl UpsertRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column, replacing the value if the column is already present.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl FromIterator<(String, Value)> for UpsertRow {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut row = UpsertRow::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}
